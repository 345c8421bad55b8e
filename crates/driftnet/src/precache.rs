//! Session-scoped asset name lists.
//!
//! Four ordered lists (sounds, models, animations, particles) are agreed on
//! during the reliable bootstrap and never change afterwards. Wire indices
//! are positions in these lists.

use crate::wire::{WireError, WireReader, WireWriter};

/// How many bytes an asset index occupies on the wire. Derived from the
/// already-negotiated list length on both peers, so it is never negotiated
/// separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWidth {
    /// Lists of at most 255 entries: one byte, biased by +1 so `-1` ("none")
    /// encodes as 0 and index 254 as 255.
    One,
    /// Larger lists: a plain little-endian i16.
    Two,
}

impl IndexWidth {
    pub fn for_len(len: usize) -> Self {
        if len <= u8::MAX as usize {
            IndexWidth::One
        } else {
            IndexWidth::Two
        }
    }

    pub fn write(self, w: &mut WireWriter, value: i16) {
        match self {
            IndexWidth::One => w.write_u8((value + 1) as u8),
            IndexWidth::Two => w.write_i16(value),
        }
    }

    pub fn read(self, r: &mut WireReader) -> Result<i16, WireError> {
        match self {
            IndexWidth::One => Ok(r.read_u8()? as i16 - 1),
            IndexWidth::Two => r.read_i16(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrecacheError {
    #[error("precache list overflows the index space ({0} entries)")]
    ListFull(usize),
    #[error("unterminated name in precache list")]
    UnterminatedName,
    #[error("precache name is not valid UTF-8")]
    BadEncoding(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Wire(#[from] WireError),
}

const MAX_LIST_LEN: usize = i16::MAX as usize;

/// The four asset lists. Populate before the session starts; the tables are
/// frozen once the first init packet has been built from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrecacheTables {
    sounds: Vec<String>,
    models: Vec<String>,
    animations: Vec<String>,
    particles: Vec<String>,
}

impl PrecacheTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sound(&mut self, name: impl Into<String>) -> Result<i16, PrecacheError> {
        Self::push(&mut self.sounds, name.into())
    }

    pub fn add_model(&mut self, name: impl Into<String>) -> Result<i16, PrecacheError> {
        Self::push(&mut self.models, name.into())
    }

    pub fn add_animation(&mut self, name: impl Into<String>) -> Result<i16, PrecacheError> {
        Self::push(&mut self.animations, name.into())
    }

    pub fn add_particle(&mut self, name: impl Into<String>) -> Result<i16, PrecacheError> {
        Self::push(&mut self.particles, name.into())
    }

    fn push(list: &mut Vec<String>, name: String) -> Result<i16, PrecacheError> {
        if list.len() >= MAX_LIST_LEN {
            return Err(PrecacheError::ListFull(list.len()));
        }
        list.push(name);
        Ok((list.len() - 1) as i16)
    }

    pub fn sound_name(&self, index: i16) -> Option<&str> {
        Self::get(&self.sounds, index)
    }

    pub fn model_name(&self, index: i16) -> Option<&str> {
        Self::get(&self.models, index)
    }

    pub fn animation_name(&self, index: i16) -> Option<&str> {
        Self::get(&self.animations, index)
    }

    pub fn particle_name(&self, index: i16) -> Option<&str> {
        Self::get(&self.particles, index)
    }

    fn get(list: &[String], index: i16) -> Option<&str> {
        usize::try_from(index)
            .ok()
            .and_then(|i| list.get(i))
            .map(String::as_str)
    }

    pub fn sound_count(&self) -> usize {
        self.sounds.len()
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn animation_count(&self) -> usize {
        self.animations.len()
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn model_width(&self) -> IndexWidth {
        IndexWidth::for_len(self.models.len())
    }

    pub fn animation_width(&self) -> IndexWidth {
        IndexWidth::for_len(self.animations.len())
    }

    pub fn particle_width(&self) -> IndexWidth {
        IndexWidth::for_len(self.particles.len())
    }

    pub fn sound_names(&self) -> impl Iterator<Item = &str> {
        self.sounds.iter().map(String::as_str)
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(String::as_str)
    }

    pub fn animation_names(&self) -> impl Iterator<Item = &str> {
        self.animations.iter().map(String::as_str)
    }

    pub fn particle_names(&self) -> impl Iterator<Item = &str> {
        self.particles.iter().map(String::as_str)
    }

    /// Serializes all four lists in bootstrap order: sounds, models,
    /// animations, particles. Each list is a u16 count followed by
    /// NUL-terminated UTF-8 names.
    pub fn write(&self, w: &mut WireWriter) {
        for list in [&self.sounds, &self.models, &self.animations, &self.particles] {
            w.write_u16(list.len() as u16);
            for name in list {
                w.write_bytes(name.as_bytes());
                w.write_u8(0);
            }
        }
    }

    pub fn read(r: &mut WireReader) -> Result<Self, PrecacheError> {
        let sounds = Self::read_list(r)?;
        let models = Self::read_list(r)?;
        let animations = Self::read_list(r)?;
        let particles = Self::read_list(r)?;
        Ok(Self {
            sounds,
            models,
            animations,
            particles,
        })
    }

    fn read_list(r: &mut WireReader) -> Result<Vec<String>, PrecacheError> {
        let count = r.read_u16()? as usize;
        let mut list = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let mut bytes = Vec::new();
            loop {
                match r.read_u8() {
                    Ok(0) => break,
                    Ok(b) => bytes.push(b),
                    Err(_) => return Err(PrecacheError::UnterminatedName),
                }
            }
            list.push(std::str::from_utf8(&bytes)?.to_owned());
        }
        Ok(list)
    }
}
