//! Decorative image assets: handheld borders and boot animations. Assets are optional. One that is
//! missing or can not be decoded is logged and treated as absent, so a broken upload never stops a
//! game from being played.

use std::collections::HashMap;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use tracing::debug;
use tracing::warn;

use crate::frame::pipeline;
use crate::Console;
use crate::EngineConfig;
use crate::Frame;

/// Loads assets relative to a root directory and keeps the decoded images around.
#[derive(Debug)]
pub struct AssetStore {
    root: PathBuf,
    images: Mutex<HashMap<PathBuf, Arc<Frame>>>,
    animations: Mutex<HashMap<PathBuf, Arc<[Frame]>>>,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            images: Mutex::default(),
            animations: Mutex::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A still image (PNG).
    pub fn image(&self, relative: impl AsRef<Path>) -> Option<Arc<Frame>> {
        let path = self.resolve(relative.as_ref())?;
        let mut images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(image) = images.get(&path) {
            return Some(image.clone());
        }
        let data = read_asset(&path)?;
        let image = pipeline::decode_png(&data)
            .inspect_err(|err| warn!("Could not decode image {}: {err}", path.display()))
            .ok()?;
        let image = Arc::new(image);
        images.insert(path, image.clone());
        Some(image)
    }

    /// Every frame of an animation (GIF).
    pub fn animation(&self, relative: impl AsRef<Path>) -> Option<Arc<[Frame]>> {
        let path = self.resolve(relative.as_ref())?;
        let mut animations = self.animations.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(frames) = animations.get(&path) {
            return Some(frames.clone());
        }
        let data = read_asset(&path)?;
        let frames: Arc<[Frame]> = pipeline::decode_gif(&data)
            .inspect_err(|err| warn!("Could not decode animation {}: {err}", path.display()))
            .ok()?
            .into();
        animations.insert(path, frames.clone());
        Some(frames)
    }

    /// Joins a path to the root. Asset names partly come from users, so only plain relative
    /// paths that stay below the root are accepted.
    fn resolve(&self, relative: &Path) -> Option<PathBuf> {
        let contained = relative
            .components()
            .all(|part| matches!(part, Component::Normal(_) | Component::CurDir));
        if !contained {
            warn!("Refusing asset {} outside of the asset root", relative.display());
            return None;
        }
        Some(self.root.join(relative))
    }

    /// The boot animation of a console, stretched to the length of its boot intro. Consoles
    /// without a boot intro, and cartridges without an animation, get an empty sequence.
    pub fn boot_animation(&self, console: Console, name: Option<&str>, config: &EngineConfig) -> Vec<Frame> {
        let Some(name) = name else {
            return Vec::new();
        };
        if console.boot_ticks() == 0 {
            return Vec::new();
        }
        let Some(source) = self.animation(Path::new(&console.to_string()).join(name)) else {
            return Vec::new();
        };
        pipeline::boot_sequence(
            &source,
            console.screen_size(),
            config.boot_frames,
            config.boot_frame_hold,
        )
    }
}

fn read_asset(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(data) => Some(data),
        Err(err) => {
            debug!("Asset {} is unavailable: {err}", path.display());
            None
        }
    }
}
