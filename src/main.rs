use std::path::PathBuf;

use clap::{Parser, Subcommand};
use goallist::accounts::UserStore;
use goallist::config::Config;
use goallist::db::Database;
use goallist::error::Result;
use goallist::goals::GoalStore;
use goallist::profile_image::ProfileImageRenderer;

#[derive(Parser, Debug)]
#[command(name = "goallist")]
#[command(about = "Goal list administration")]
#[command(version = goallist::version())]
struct Cli {
    /// SQLite database path; overrides the config file and `GOALLIST_DB`.
    #[arg(long)]
    db: Option<String>,

    #[arg(long, env = "GOALLIST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an active staff account.
    CreateSuperuser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        address: String,
        #[arg(long, env = "GOALLIST_SUPERUSER_PASSWORD")]
        password: String,
    },
    /// Render the profile card of a goal and print the written path.
    Render { goal_id: i32 },
    /// Recompute the stored progress of a goal from its tasks.
    RefreshProgress { goal_id: i32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    goallist::logging::init_tracing("goallist");
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref(), cli.db.as_deref())?;
    let db = Database::open(&config.database.sqlite_path).await?;

    match cli.command {
        Command::CreateSuperuser {
            username,
            address,
            password,
        } => {
            let user = UserStore::new(db)
                .create_superuser(&username, &address, &password)
                .await?;
            println!("created superuser {} <{}> (id {})", user.username, user.address, user.id);
        }
        Command::Render { goal_id } => {
            let renderer = ProfileImageRenderer::new(db, config.profile_image.clone());
            let rendered = renderer.render_for_goal(goal_id).await?;
            println!("{}", rendered.path.display());
        }
        Command::RefreshProgress { goal_id } => {
            let progress = GoalStore::new(db).refresh_progress(goal_id).await?;
            println!("goal {goal_id}: {progress}%");
        }
    }
    Ok(())
}
