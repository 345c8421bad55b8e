use glam::Vec3;

/// Hard cap on replicated objects per session: the id namespace is 12 bits.
pub const MAX_OBJECTS: usize = 4096;

const INDEX_MASK: u16 = 0x0FFF;

bitflags::bitflags! {
    /// The four flag bits carried in the high nibble of a wire `NetworkId`.
    /// They describe the object's identity and shape, not which fields
    /// changed, so they ride with the id rather than the field mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InlineFlags: u16 {
        const IS_2D = 1 << 12;
        const COMPRESSED_MOTION = 1 << 13;
        const IS_ATTACHED = 1 << 14;
        const HAS_BLOB = 1 << 15;
    }
}

/// Session-scoped replication id: a 12-bit slot index. The server assigns
/// one per object; the client mirrors it at the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NetworkId(u16);

impl NetworkId {
    /// Wraps a slot index. Callers must stay below [`MAX_OBJECTS`].
    pub fn new(index: u16) -> Self {
        debug_assert!(index <= INDEX_MASK);
        Self(index & INDEX_MASK)
    }

    pub fn index(self) -> u16 {
        self.0
    }

    /// Composes the 16-bit wire form: index in the low 12 bits, inline flags
    /// in the high 4.
    pub fn to_wire(self, flags: InlineFlags) -> u16 {
        self.0 | flags.bits()
    }

    /// Splits a 16-bit wire value back into id and flags.
    pub fn from_wire(raw: u16) -> (Self, InlineFlags) {
        (
            Self(raw & INDEX_MASK),
            InlineFlags::from_bits_truncate(raw & !INDEX_MASK),
        )
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One replicated object's authoritative state at a single frame.
///
/// Neutral defaults (zero vectors, identity scale, `-1` indices) are what a
/// first transmission deltas against, so a freshly spawned object with no
/// interesting fields costs only its header on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    pub id: NetworkId,
    /// Sticky at creation: flat replicas serialize two-component vectors and
    /// use only the Y component of `orientation` as their rotation angle.
    pub is_2d: bool,
    /// Opts orientation and velocity into direction-codebook quantization.
    /// Only meaningful for 3D objects.
    pub compressed_motion: bool,
    pub position: Vec3,
    /// Euler angles in radians.
    pub orientation: Vec3,
    pub scale: Vec3,
    pub velocity: Vec3,
    pub model: i16,
    pub animation: i16,
    pub particle: i16,
    /// Sign-encoded: `-1` none, `> -1` a 3D sound index (with a radius
    /// byte on the wire), `< -1` a 2D sound stored as `-(index + 2)`.
    pub sound: i16,
    /// Audible radius in meters for 3D sounds.
    pub sound_radius: u8,
    /// Bounding-sphere radius, used only server-side for culling.
    pub view_radius: f32,
    /// Logical parent by id. While set, transform fields stay off the wire
    /// and the client copies the parent's transform.
    pub attached_to: Option<NetworkId>,
    /// Opaque payload, at most 255 bytes.
    pub blob: Option<Vec<u8>>,
}

impl ObjectState {
    pub fn new(id: NetworkId, is_2d: bool) -> Self {
        Self {
            id,
            is_2d,
            compressed_motion: false,
            position: Vec3::ZERO,
            orientation: Vec3::ZERO,
            scale: Vec3::ONE,
            velocity: Vec3::ZERO,
            model: -1,
            animation: -1,
            particle: -1,
            sound: -1,
            sound_radius: 0,
            view_radius: 0.0,
            attached_to: None,
            blob: None,
        }
    }

    /// Inline flags implied by this state when every optional payload is
    /// transmitted (blob and attach bits are narrowed per-delta by the
    /// codec).
    pub fn inline_flags(&self) -> InlineFlags {
        let mut flags = InlineFlags::empty();
        if self.is_2d {
            flags |= InlineFlags::IS_2D;
        }
        if self.compressed_motion && !self.is_2d {
            flags |= InlineFlags::COMPRESSED_MOTION;
        }
        if self.attached_to.is_some() {
            flags |= InlineFlags::IS_ATTACHED;
        }
        if self.blob.is_some() {
            flags |= InlineFlags::HAS_BLOB;
        }
        flags
    }

    /// Encodes a 2D sound index into the sign-encoded wire form.
    pub fn set_flat_sound(&mut self, index: i16) {
        self.sound = -(index + 2);
    }

    /// Starts a 3D sound with the given audible radius.
    pub fn set_spatial_sound(&mut self, index: i16, radius: u8) {
        self.sound = index;
        self.sound_radius = radius;
    }

    pub fn clear_sound(&mut self) {
        self.sound = -1;
        self.sound_radius = 0;
    }

    /// True when a sound is playing, in either encoding.
    pub fn has_sound(&self) -> bool {
        self.sound != -1
    }
}

/// Decodes the sign-encoded sound field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundKind {
    None,
    /// 3D sound: precache index plus audible radius.
    Spatial { index: i16, radius: u8 },
    /// 2D sound: precache index (decoded from `-(index + 2)`).
    Flat { index: i16 },
}

impl SoundKind {
    pub fn from_wire(sound: i16, radius: u8) -> Self {
        if sound == -1 {
            SoundKind::None
        } else if sound < -1 {
            SoundKind::Flat {
                index: -(sound + 2),
            }
        } else {
            SoundKind::Spatial {
                index: sound,
                radius,
            }
        }
    }
}
