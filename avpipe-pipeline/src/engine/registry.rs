//! Explicitly constructed catalogue of available engines.

use super::{CodecEngine, Direction, EngineInfo, MediaKind, PassthroughEngine};
use avpipe_core::format::keys;
use avpipe_core::{Error, FormatMap, Result};
use tracing::{debug, info, warn};

/// Builds a fresh engine instance. Hardware factories fail when the device
/// is unavailable.
pub type EngineFactory = Box<dyn Fn() -> Result<Box<dyn CodecEngine>> + Send + Sync>;

struct Entry {
    info: EngineInfo,
    factory: EngineFactory,
}

/// Registry of engine implementations.
///
/// Owned by whoever creates pipelines; there is no process-wide instance.
#[derive(Default)]
pub struct EngineRegistry {
    entries: Vec<Entry>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the passthrough engines.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for media in [MediaKind::Audio, MediaKind::Video] {
            let info = PassthroughEngine::new(media).info().clone();
            registry.register(
                EngineInfo {
                    name: format!("passthrough.{}", media_name(media)),
                    ..info
                },
                move || Ok(Box::new(PassthroughEngine::new(media)) as Box<dyn CodecEngine>),
            );
        }
        registry
    }

    /// Add an engine. A later registration with the same name replaces the
    /// earlier one.
    pub fn register<F>(&mut self, info: EngineInfo, factory: F)
    where
        F: Fn() -> Result<Box<dyn CodecEngine>> + Send + Sync + 'static,
    {
        self.entries.retain(|e| e.info.name != info.name);
        debug!(engine = %info, "engine registered");
        self.entries.push(Entry {
            info,
            factory: Box::new(factory),
        });
    }

    pub fn list(&self) -> impl Iterator<Item = &EngineInfo> {
        self.entries.iter().map(|e| &e.info)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instantiate the engine registered as `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn CodecEngine>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.info.name == name)
            .ok_or_else(|| Error::unsupported(format!("no engine named '{name}'")))?;
        (entry.factory)()
    }

    /// Engines able to handle `media`/`direction` (and `mime`, if given),
    /// hardware first, otherwise in registration order.
    pub fn candidates(
        &self,
        media: MediaKind,
        direction: Direction,
        mime: Option<&str>,
    ) -> Vec<&EngineInfo> {
        let mut found: Vec<&EngineInfo> = self
            .entries
            .iter()
            .map(|e| &e.info)
            .filter(|i| i.media == media && i.direction == direction)
            .filter(|i| mime.map_or(true, |m| i.accepts(m)))
            .collect();
        found.sort_by_key(|i| !i.kind.is_hardware());
        found
    }

    /// Instantiate the best engine for `format`, falling back through the
    /// candidates until one can be created.
    pub fn create_best(
        &self,
        media: MediaKind,
        direction: Direction,
        format: &FormatMap,
    ) -> Result<Box<dyn CodecEngine>> {
        let mime = format.get_string(keys::MIME);
        let candidates = self.candidates(media, direction, mime);
        if candidates.is_empty() {
            return Err(Error::unsupported(format!(
                "no {media:?} {direction:?} engine for {}",
                mime.unwrap_or("any format")
            )));
        }
        let mut last_err = None;
        for info in candidates {
            info!(engine = %info.name, "trying engine");
            match self.create(&info.name) {
                Ok(engine) => return Ok(engine),
                Err(e) => {
                    warn!(engine = %info.name, error = %e, "engine unavailable, falling back");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::unsupported("no engine could be created")))
    }
}

fn media_name(media: MediaKind) -> &'static str {
    match media {
        MediaKind::Audio => "audio",
        MediaKind::Video => "video",
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}
