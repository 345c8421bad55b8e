//! Per-object delta encoding.
//!
//! Each object record is a 3-byte header (12-bit id + 4 inline flags, then an
//! 8-bit field mask) followed by the changed fields in a strict order:
//! velocity, position, orientation, scale, sound, model, animation, particle,
//! blob. Attachment short-circuits the transform fields entirely.

use glam::Vec3;

use super::buffer::{WireError, WireReader, WireWriter};
use super::normals::{byte_to_dir, dir_to_byte};
use crate::precache::{IndexWidth, PrecacheTables};
use crate::snapshot::{InlineFlags, NetworkId, ObjectState};

/// Bytes occupied by the id + field-mask header.
pub const OBJECT_HEADER_BYTES: usize = 3;

bitflags::bitflags! {
    /// Presence bits for the per-frame fields. Together with the four inline
    /// flags in the id this forms the effective 12-bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FieldMask: u8 {
        const POSITION = 1 << 0;
        const ORIENTATION = 1 << 1;
        const VELOCITY = 1 << 2;
        const SCALE = 1 << 3;
        const SOUND = 1 << 4;
        const MODEL = 1 << 5;
        const ANIMATION = 1 << 6;
        const PARTICLE = 1 << 7;
    }
}

/// Baseline float width for transform vectors, chosen once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum VectorPrecision {
    #[default]
    Full,
    Half,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VectorMode {
    Full,
    Half,
    /// float16 magnitude plus a direction-codebook byte. Never used for
    /// position or scale, and only for 3D objects.
    Compressed,
}

/// Session-wide codec parameters: the float precision selection and the
/// asset index widths derived from the precache list lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    pub precision: VectorPrecision,
    pub model_width: IndexWidth,
    pub animation_width: IndexWidth,
    pub particle_width: IndexWidth,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            precision: VectorPrecision::Full,
            model_width: IndexWidth::One,
            animation_width: IndexWidth::One,
            particle_width: IndexWidth::One,
        }
    }
}

impl CodecConfig {
    pub fn new(precision: VectorPrecision, tables: &PrecacheTables) -> Self {
        Self {
            precision,
            model_width: tables.model_width(),
            animation_width: tables.animation_width(),
            particle_width: tables.particle_width(),
        }
    }

    fn plain_mode(&self) -> VectorMode {
        match self.precision {
            VectorPrecision::Full => VectorMode::Full,
            VectorPrecision::Half => VectorMode::Half,
        }
    }

    fn motion_mode(&self, compressed: bool, is_2d: bool) -> VectorMode {
        if compressed && !is_2d {
            VectorMode::Compressed
        } else {
            self.plain_mode()
        }
    }
}

/// The decoded form of one object record: which fields arrived and their
/// values. Absent fields are untouched on the receiving side.
#[derive(Debug, Clone, Default)]
pub struct ObjectDelta {
    pub id: NetworkId,
    pub is_2d: bool,
    pub compressed_motion: bool,
    /// Present only when the attach target changed this delta.
    pub attached_to: Option<NetworkId>,
    pub velocity: Option<Vec3>,
    pub position: Option<Vec3>,
    pub orientation: Option<Vec3>,
    pub scale: Option<Vec3>,
    /// Raw sign-encoded sound index plus radius byte (0 for non-3D sounds).
    pub sound: Option<(i16, u8)>,
    pub model: Option<i16>,
    pub animation: Option<i16>,
    pub particle: Option<i16>,
    pub blob: Option<Vec<u8>>,
}

impl ObjectDelta {
    /// Reconstructs the presence mask, for symmetry checks.
    pub fn mask(&self) -> FieldMask {
        let mut mask = FieldMask::empty();
        if self.position.is_some() {
            mask |= FieldMask::POSITION;
        }
        if self.orientation.is_some() {
            mask |= FieldMask::ORIENTATION;
        }
        if self.velocity.is_some() {
            mask |= FieldMask::VELOCITY;
        }
        if self.scale.is_some() {
            mask |= FieldMask::SCALE;
        }
        if self.sound.is_some() {
            mask |= FieldMask::SOUND;
        }
        if self.model.is_some() {
            mask |= FieldMask::MODEL;
        }
        if self.animation.is_some() {
            mask |= FieldMask::ANIMATION;
        }
        if self.particle.is_some() {
            mask |= FieldMask::PARTICLE;
        }
        mask
    }
}

/// Delta-encodes `state` against `baseline` (or against neutral defaults
/// when there is no baseline). Returns the number of bytes written.
///
/// Policy for "nothing changed": a detached object with an empty mask and no
/// pending blob writes **zero bytes** — the caller simply skips it. An
/// attached object always writes at least its header so the receiver keeps
/// treating it as attached; the IS_ATTACHED wire flag (and the 2-byte target
/// that follows the header) appear only when the attach target itself
/// changed.
pub fn encode_object(
    w: &mut WireWriter,
    state: &ObjectState,
    baseline: Option<&ObjectState>,
    cfg: &CodecConfig,
) -> Result<usize, WireError> {
    let start = w.len();
    let attached = state.attached_to.is_some();
    let attach_changed = match baseline {
        Some(b) => state.attached_to != b.attached_to,
        None => attached,
    };
    // Transitioning out of attachment is signalled by a velocity field; the
    // receiver detaches before applying kinematics (a zero velocity then
    // just leaves the object parked where it was).
    let detach_forced = !attached && baseline.is_some_and(|b| b.attached_to.is_some());

    let mut mask = FieldMask::empty();

    if !attached {
        match baseline {
            None => {
                if state.velocity != Vec3::ZERO {
                    mask |= FieldMask::VELOCITY;
                }
                if state.position != Vec3::ZERO {
                    mask |= FieldMask::POSITION;
                }
                if state.orientation != Vec3::ZERO {
                    mask |= FieldMask::ORIENTATION;
                }
                if state.scale != Vec3::ONE {
                    mask |= FieldMask::SCALE;
                }
            }
            Some(b) => {
                if state.velocity != b.velocity {
                    mask |= FieldMask::VELOCITY;
                }
                if state.position != b.position {
                    mask |= FieldMask::POSITION;
                }
                if state.orientation != b.orientation {
                    mask |= FieldMask::ORIENTATION;
                }
                if state.scale != b.scale {
                    mask |= FieldMask::SCALE;
                }
            }
        }

        if detach_forced {
            mask |= FieldMask::VELOCITY;
        }

        if mask.contains(FieldMask::VELOCITY) {
            // A velocity update always carries position to correct drift.
            mask |= FieldMask::POSITION;
        } else if baseline.is_some() && state.velocity != Vec3::ZERO {
            // Dead reckoning covers position while velocity is unchanged.
            mask.remove(FieldMask::POSITION);
        }
    }

    let sound_changed = match baseline {
        Some(b) => {
            state.sound != b.sound || (state.sound > -1 && state.sound_radius != b.sound_radius)
        }
        None => state.sound != -1,
    };
    if sound_changed {
        mask |= FieldMask::SOUND;
    }
    if state.model != baseline.map_or(-1, |b| b.model) {
        mask |= FieldMask::MODEL;
    }
    if state.animation != baseline.map_or(-1, |b| b.animation) {
        mask |= FieldMask::ANIMATION;
    }
    if state.particle != baseline.map_or(-1, |b| b.particle) {
        mask |= FieldMask::PARTICLE;
    }

    let blob = match (&state.blob, baseline) {
        (Some(blob), Some(b)) if b.blob.as_ref() == Some(blob) => None,
        (Some(blob), _) => Some(blob.as_slice()),
        (None, _) => None,
    };
    if let Some(blob) = blob {
        if blob.len() > u8::MAX as usize {
            return Err(WireError::BlobTooLarge(blob.len()));
        }
    }

    if mask.is_empty() && blob.is_none() && !attached {
        return Ok(0);
    }

    let mut flags = InlineFlags::empty();
    if state.is_2d {
        flags |= InlineFlags::IS_2D;
    }
    if state.compressed_motion && !state.is_2d {
        flags |= InlineFlags::COMPRESSED_MOTION;
    }
    if attached && attach_changed {
        flags |= InlineFlags::IS_ATTACHED;
    }
    if blob.is_some() {
        flags |= InlineFlags::HAS_BLOB;
    }

    w.write_u16(state.id.to_wire(flags));
    w.write_u8(mask.bits());

    if flags.contains(InlineFlags::IS_ATTACHED) {
        if let Some(target) = state.attached_to {
            w.write_u16(target.index());
        }
    }

    let motion = cfg.motion_mode(state.compressed_motion, state.is_2d);
    let plain = cfg.plain_mode();

    if mask.contains(FieldMask::VELOCITY) {
        write_vector(w, state.velocity, state.is_2d, motion);
    }
    if mask.contains(FieldMask::POSITION) {
        write_vector(w, state.position, state.is_2d, plain);
    }
    if mask.contains(FieldMask::ORIENTATION) {
        write_vector(w, state.orientation, state.is_2d, motion);
    }
    if mask.contains(FieldMask::SCALE) {
        write_vector(w, state.scale, state.is_2d, plain);
    }
    if mask.contains(FieldMask::SOUND) {
        w.write_i16(state.sound);
        if state.sound > -1 {
            w.write_u8(state.sound_radius);
        }
    }
    if mask.contains(FieldMask::MODEL) {
        cfg.model_width.write(w, state.model);
    }
    if mask.contains(FieldMask::ANIMATION) {
        cfg.animation_width.write(w, state.animation);
    }
    if mask.contains(FieldMask::PARTICLE) {
        cfg.particle_width.write(w, state.particle);
    }
    if let Some(blob) = blob {
        w.write_u8(blob.len() as u8);
        w.write_bytes(blob);
    }

    Ok(w.len() - start)
}

/// Full-state encoding for the bootstrap snapshot: a delta against nothing.
pub fn encode_full(
    w: &mut WireWriter,
    state: &ObjectState,
    cfg: &CodecConfig,
) -> Result<usize, WireError> {
    encode_object(w, state, None, cfg)
}

/// Decodes one object record. Fails only on underrun; the caller must then
/// discard the whole datagram.
pub fn decode_object(r: &mut WireReader, cfg: &CodecConfig) -> Result<ObjectDelta, WireError> {
    let raw = r.read_u16()?;
    let (id, flags) = NetworkId::from_wire(raw);
    let mask = FieldMask::from_bits_truncate(r.read_u8()?);

    let is_2d = flags.contains(InlineFlags::IS_2D);
    let compressed_motion = flags.contains(InlineFlags::COMPRESSED_MOTION);

    let mut delta = ObjectDelta {
        id,
        is_2d,
        compressed_motion,
        ..ObjectDelta::default()
    };

    if flags.contains(InlineFlags::IS_ATTACHED) {
        let (target, _) = NetworkId::from_wire(r.read_u16()?);
        delta.attached_to = Some(target);
    }

    let motion = cfg.motion_mode(compressed_motion, is_2d);
    let plain = cfg.plain_mode();

    if mask.contains(FieldMask::VELOCITY) {
        delta.velocity = Some(read_vector(r, is_2d, motion)?);
    }
    if mask.contains(FieldMask::POSITION) {
        delta.position = Some(read_vector(r, is_2d, plain)?);
    }
    if mask.contains(FieldMask::ORIENTATION) {
        delta.orientation = Some(read_vector(r, is_2d, motion)?);
    }
    if mask.contains(FieldMask::SCALE) {
        delta.scale = Some(read_vector(r, is_2d, plain)?);
    }
    if mask.contains(FieldMask::SOUND) {
        let sound = r.read_i16()?;
        let radius = if sound > -1 { r.read_u8()? } else { 0 };
        delta.sound = Some((sound, radius));
    }
    if mask.contains(FieldMask::MODEL) {
        delta.model = Some(cfg.model_width.read(r)?);
    }
    if mask.contains(FieldMask::ANIMATION) {
        delta.animation = Some(cfg.animation_width.read(r)?);
    }
    if mask.contains(FieldMask::PARTICLE) {
        delta.particle = Some(cfg.particle_width.read(r)?);
    }
    if flags.contains(InlineFlags::HAS_BLOB) {
        let len = r.read_u8()? as usize;
        delta.blob = Some(r.read_bytes(len)?.to_vec());
    }

    Ok(delta)
}

fn write_vector(w: &mut WireWriter, v: Vec3, is_2d: bool, mode: VectorMode) {
    match mode {
        VectorMode::Full => {
            w.write_f32(v.x);
            w.write_f32(v.y);
            if !is_2d {
                w.write_f32(v.z);
            }
        }
        VectorMode::Half => {
            w.write_f16(v.x);
            w.write_f16(v.y);
            if !is_2d {
                w.write_f16(v.z);
            }
        }
        VectorMode::Compressed => {
            w.write_f16(v.length());
            w.write_u8(dir_to_byte(v));
        }
    }
}

fn read_vector(r: &mut WireReader, is_2d: bool, mode: VectorMode) -> Result<Vec3, WireError> {
    match mode {
        VectorMode::Full => {
            let x = r.read_f32()?;
            let y = r.read_f32()?;
            let z = if is_2d { 0.0 } else { r.read_f32()? };
            Ok(Vec3::new(x, y, z))
        }
        VectorMode::Half => {
            let x = r.read_f16()?;
            let y = r.read_f16()?;
            let z = if is_2d { 0.0 } else { r.read_f16()? };
            Ok(Vec3::new(x, y, z))
        }
        VectorMode::Compressed => {
            let magnitude = r.read_f16()?;
            let dir = byte_to_dir(r.read_u8()?);
            Ok(dir * magnitude)
        }
    }
}
