diesel::table! {
    users (id) {
        id -> Integer,
        username -> Text,
        address -> Text,
        password_hash -> Text,
        job -> Nullable<Text>,
        introduction -> Nullable<Text>,
        birthday -> Nullable<Date>,
        picture -> Nullable<Text>,
        is_active -> Bool,
        is_staff -> Bool,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    goals (id) {
        id -> Integer,
        user_id -> Integer,
        title -> Text,
        detail -> Text,
        progress -> Integer,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    tasks (id) {
        id -> Integer,
        goal_id -> Integer,
        title -> Text,
        done -> Bool,
        priority -> Integer,
        due -> Nullable<Date>,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    sessions (id) {
        id -> Integer,
        token_digest -> Text,
        user_id -> Integer,
        remember -> Bool,
        created_at -> BigInt,
        expires_at -> BigInt,
    }
}

diesel::joinable!(goals -> users (user_id));
diesel::joinable!(tasks -> goals (goal_id));
diesel::joinable!(sessions -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(users, goals, tasks, sessions);
