//! Out-of-band resource handles.
//!
//! A [`Handle`] is a move-only token for a kernel-style object. It travels
//! beside the message bytes, never inside them, and it is closed when dropped.
//! [`HandleInfo`] pairs a handle with the object type and rights it carries
//! across a transport.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Koid of the invalid handle.
pub const INVALID_KOID: u64 = 0;

static NEXT_KOID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct HandleState {
    closed: AtomicBool,
}

/// An owned resource handle.
///
/// Handles are not `Clone`. Dropping one closes the underlying object.
pub struct Handle {
    koid: u64,
    state: Option<Arc<HandleState>>,
}

impl Handle {
    /// Create a handle to a fresh object.
    pub fn new() -> Self {
        Self {
            koid: NEXT_KOID.fetch_add(1, Ordering::Relaxed),
            state: Some(Arc::new(HandleState {
                closed: AtomicBool::new(false),
            })),
        }
    }

    /// The invalid handle, used for absent slots.
    pub const fn invalid() -> Self {
        Self {
            koid: INVALID_KOID,
            state: None,
        }
    }

    /// Create a handle along with a watch that observes when it is closed.
    pub fn with_watch() -> (Self, HandleWatch) {
        let handle = Self::new();
        let watch = handle.watch().unwrap_or_else(HandleWatch::closed);
        (handle, watch)
    }

    /// Process-unique identity of the underlying object.
    pub fn koid(&self) -> u64 {
        self.koid
    }

    pub fn is_invalid(&self) -> bool {
        self.state.is_none()
    }

    /// Returns a watch for this handle, or `None` if it is invalid.
    pub fn watch(&self) -> Option<HandleWatch> {
        self.state.as_ref().map(|state| HandleWatch {
            state: Arc::clone(state),
        })
    }

    /// Take the handle out of `self`, leaving the invalid handle behind.
    pub fn take(&mut self) -> Handle {
        std::mem::replace(self, Handle::invalid())
    }

    /// Close the handle explicitly.
    pub fn close(self) {
        drop(self);
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::invalid()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.closed.store(true, Ordering::Release);
            tracing::trace!(koid = self.koid, "handle closed");
        }
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.koid == other.koid
    }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "Handle(invalid)")
        } else {
            write!(f, "Handle({})", self.koid)
        }
    }
}

/// Observes whether a handle has been closed.
#[derive(Debug, Clone)]
pub struct HandleWatch {
    state: Arc<HandleState>,
}

impl HandleWatch {
    fn closed() -> Self {
        Self {
            state: Arc::new(HandleState {
                closed: AtomicBool::new(true),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }
}

/// Kind of object a handle refers to.
#[repr(u32)]
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    /// Matches any object type when used in a declaration.
    #[default]
    None = 0,
    Process = 1,
    Thread = 2,
    Vmo = 3,
    Channel = 4,
    Event = 5,
    Port = 6,
    Socket = 14,
    Resource = 15,
    EventPair = 16,
    Job = 17,
    Vmar = 18,
    Fifo = 19,
    Timer = 22,
}

impl ObjectType {
    /// Convert from a u32 wire value.
    pub fn from_u32(val: u32) -> Option<Self> {
        Some(match val {
            0 => ObjectType::None,
            1 => ObjectType::Process,
            2 => ObjectType::Thread,
            3 => ObjectType::Vmo,
            4 => ObjectType::Channel,
            5 => ObjectType::Event,
            6 => ObjectType::Port,
            14 => ObjectType::Socket,
            15 => ObjectType::Resource,
            16 => ObjectType::EventPair,
            17 => ObjectType::Job,
            18 => ObjectType::Vmar,
            19 => ObjectType::Fifo,
            22 => ObjectType::Timer,
            _ => return None,
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

bitflags::bitflags! {
    /// Rights attached to a handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Rights: u32 {
        const DUPLICATE = 1 << 0;
        const TRANSFER = 1 << 1;
        const READ = 1 << 2;
        const WRITE = 1 << 3;
        const EXECUTE = 1 << 4;
        const MAP = 1 << 5;
        const GET_PROPERTY = 1 << 6;
        const SET_PROPERTY = 1 << 7;
        const ENUMERATE = 1 << 8;
        const DESTROY = 1 << 9;
        const SIGNAL = 1 << 12;
        const SIGNAL_PEER = 1 << 13;
        const WAIT = 1 << 14;
        const INSPECT = 1 << 15;
        /// In a declaration: keep whatever rights the handle already has.
        const SAME_RIGHTS = 1 << 31;

        const BASIC = Self::TRANSFER.bits()
            | Self::DUPLICATE.bits()
            | Self::WAIT.bits()
            | Self::INSPECT.bits();
        const IO = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl Default for Rights {
    fn default() -> Self {
        Rights::SAME_RIGHTS
    }
}

/// Why a handle failed a declared type/rights check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleCheckError {
    IncorrectType {
        expected: ObjectType,
        actual: ObjectType,
    },
    MissingRights {
        required: Rights,
        actual: Rights,
    },
}

impl fmt::Display for HandleCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleCheckError::IncorrectType { expected, actual } => {
                write!(f, "expected handle of type {expected:?}, got {actual:?}")
            }
            HandleCheckError::MissingRights { required, actual } => {
                write!(f, "handle rights {actual:?} lack required {required:?}")
            }
        }
    }
}

impl std::error::Error for HandleCheckError {}

/// A handle together with the object type and rights it is transferred with.
#[derive(Debug, PartialEq, Eq)]
pub struct HandleInfo {
    pub handle: Handle,
    pub object_type: ObjectType,
    pub rights: Rights,
}

impl HandleInfo {
    pub fn new(handle: Handle, object_type: ObjectType, rights: Rights) -> Self {
        Self {
            handle,
            object_type,
            rights,
        }
    }

    /// Check this handle against a declaration and reduce its rights to it.
    ///
    /// An object type of [`ObjectType::None`] accepts any handle, and
    /// [`Rights::SAME_RIGHTS`] accepts any rights. On error the handle is
    /// still owned by `self`; dropping it closes it.
    pub fn conform(
        &mut self,
        object_type: ObjectType,
        rights: Rights,
    ) -> Result<(), HandleCheckError> {
        if object_type != ObjectType::None
            && self.object_type != ObjectType::None
            && self.object_type != object_type
        {
            return Err(HandleCheckError::IncorrectType {
                expected: object_type,
                actual: self.object_type,
            });
        }
        if rights.contains(Rights::SAME_RIGHTS) {
            return Ok(());
        }
        if !self.rights.contains(Rights::SAME_RIGHTS) && !self.rights.contains(rights) {
            return Err(HandleCheckError::MissingRights {
                required: rights,
                actual: self.rights,
            });
        }
        self.rights = rights;
        Ok(())
    }
}
