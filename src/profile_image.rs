//! Profile card composition.
//!
//! A card is the configured template image with the owner's profile and one
//! goal written on top at fixed positions. Output is written per goal to
//! `<output_dir>/goal_<id>.png` and the PNG bytes are handed back to the caller.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;

use crate::accounts::{User, UserStore};
use crate::config::ProfileImageConfig;
use crate::db::Database;
use crate::error::{GoalListError, Result};
use crate::goals::{Goal, GoalStore};

/// Orange text, matching the published card design.
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 131, 25]);

/// One piece of text and where it lands on the template.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSlot {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub px: f32,
}

/// Everything drawn on a card, already formatted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileCard {
    pub username: String,
    pub job: String,
    pub birthday: String,
    pub introduction: String,
    pub goal_title: String,
    pub goal_detail: String,
}

impl ProfileCard {
    pub fn new(user: &User, goal: &Goal) -> Self {
        Self {
            username: user.username.clone(),
            job: user.job.clone().unwrap_or_default(),
            birthday: user
                .birthday
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            introduction: user.introduction.clone().unwrap_or_default(),
            goal_title: goal.title.clone(),
            goal_detail: goal.detail.clone(),
        }
    }

    /// Non-empty fields in drawing order.
    pub fn slots(&self) -> Vec<TextSlot> {
        [
            (&self.username, 130, 150, 40.0),
            (&self.job, 140, 220, 25.0),
            (&self.birthday, 140, 260, 25.0),
            (&self.introduction, 140, 300, 25.0),
            (&self.goal_title, 140, 340, 30.0),
            (&self.goal_detail, 140, 380, 30.0),
        ]
        .into_iter()
        .filter(|(text, ..)| !text.is_empty())
        .map(|(text, x, y, px)| TextSlot {
            text: text.clone(),
            x,
            y,
            px,
        })
        .collect()
    }
}

pub fn load_template(path: &Path) -> Result<RgbImage> {
    if !path.is_file() {
        return Err(GoalListError::Resource(format!(
            "template image not found: {}",
            path.display()
        )));
    }
    let image = image::open(path).map_err(|e| {
        GoalListError::Resource(format!("cannot decode template {}: {e}", path.display()))
    })?;
    Ok(image.to_rgb8())
}

pub fn load_font(path: &Path) -> Result<FontVec> {
    let data = std::fs::read(path).map_err(|e| {
        GoalListError::Resource(format!("cannot read font {}: {e}", path.display()))
    })?;
    // Collections (.ttc) use their first face.
    FontVec::try_from_vec_and_index(data, 0).map_err(|e| {
        GoalListError::Resource(format!("cannot parse font {}: {e}", path.display()))
    })
}

/// Draws the card onto a copy of `template`.
pub fn compose(template: &RgbImage, font: &FontVec, card: &ProfileCard) -> RgbImage {
    let mut canvas = template.clone();
    for slot in card.slots() {
        draw_text_mut(
            &mut canvas,
            TEXT_COLOR,
            slot.x,
            slot.y,
            PxScale::from(slot.px),
            font,
            &slot.text,
        );
    }
    canvas
}

pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| GoalListError::Resource(format!("cannot encode png: {e}")))?;
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct RenderedProfile {
    pub goal_id: i32,
    pub path: PathBuf,
    pub png: Vec<u8>,
}

pub struct ProfileImageRenderer {
    users: UserStore,
    goals: GoalStore,
    config: ProfileImageConfig,
}

impl ProfileImageRenderer {
    pub fn new(db: Database, config: ProfileImageConfig) -> Self {
        Self {
            users: UserStore::new(db.clone()),
            goals: GoalStore::new(db),
            config,
        }
    }

    pub fn output_path(&self, goal_id: i32) -> PathBuf {
        self.config.output_dir.join(format!("goal_{goal_id}.png"))
    }

    /// Renders a goal owned by `user_id`; anyone else's goal is not found.
    pub async fn render_for_owner(&self, user_id: i32, goal_id: i32) -> Result<RenderedProfile> {
        let goal = self.goals.get_goal(user_id, goal_id).await?;
        let user = self.users.get_user(goal.user_id).await?;
        self.render(user, goal).await
    }

    /// Renders any goal. Used by the admin CLI.
    pub async fn render_for_goal(&self, goal_id: i32) -> Result<RenderedProfile> {
        let goal = self.goals.find_goal(goal_id).await?;
        let user = self.users.get_user(goal.user_id).await?;
        self.render(user, goal).await
    }

    async fn render(&self, user: User, goal: Goal) -> Result<RenderedProfile> {
        let card = ProfileCard::new(&user, &goal);
        let template_path = self.config.template_path.clone();
        let font_path = self.config.font_path.clone();
        let output_dir = self.config.output_dir.clone();
        let path = self.output_path(goal.id);
        let goal_id = goal.id;

        let rendered = tokio::task::spawn_blocking(move || {
            let template = load_template(&template_path)?;
            let font = load_font(&font_path)?;
            let png = encode_png(&compose(&template, &font, &card))?;
            write_atomically(&output_dir, &path, &png)?;
            Ok::<_, GoalListError>(RenderedProfile { goal_id, path, png })
        })
        .await
        .map_err(|e| GoalListError::Runtime(e.to_string()))?;

        match &rendered {
            Ok(out) => tracing::info!(goal_id, path = %out.path.display(), "Rendered profile image"),
            Err(err) => tracing::error!(goal_id, error = %err, "Profile image render failed"),
        }
        rendered
    }
}

fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| {
        GoalListError::Resource(format!("cannot create {}: {e}", dir.display()))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| GoalListError::Resource(e.to_string()))?;
    tmp.write_all(bytes)
        .map_err(|e| GoalListError::Resource(e.to_string()))?;
    tmp.persist(path)
        .map_err(|e| GoalListError::Resource(e.to_string()))?;
    Ok(())
}
