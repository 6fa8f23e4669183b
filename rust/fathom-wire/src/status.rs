use std::fmt;

/// A signed status code, as carried by epitaphs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const INTERNAL: Status = Status(-1);
    pub const NOT_SUPPORTED: Status = Status(-2);
    pub const NO_RESOURCES: Status = Status(-3);
    pub const NO_MEMORY: Status = Status(-4);
    pub const INVALID_ARGS: Status = Status(-10);
    pub const BAD_HANDLE: Status = Status(-11);
    pub const WRONG_TYPE: Status = Status(-12);
    pub const OUT_OF_RANGE: Status = Status(-14);
    pub const BAD_STATE: Status = Status(-20);
    pub const TIMED_OUT: Status = Status(-21);
    pub const SHOULD_WAIT: Status = Status(-22);
    pub const CANCELED: Status = Status(-23);
    pub const PEER_CLOSED: Status = Status(-24);
    pub const NOT_FOUND: Status = Status(-25);
    pub const ALREADY_EXISTS: Status = Status(-26);
    pub const UNAVAILABLE: Status = Status(-28);
    pub const ACCESS_DENIED: Status = Status(-30);
    pub const IO: Status = Status(-40);

    pub const fn from_raw(raw: i32) -> Self {
        Status(raw)
    }

    pub const fn into_raw(self) -> i32 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Status::OK => "OK",
            Status::INTERNAL => "INTERNAL",
            Status::NOT_SUPPORTED => "NOT_SUPPORTED",
            Status::NO_RESOURCES => "NO_RESOURCES",
            Status::NO_MEMORY => "NO_MEMORY",
            Status::INVALID_ARGS => "INVALID_ARGS",
            Status::BAD_HANDLE => "BAD_HANDLE",
            Status::WRONG_TYPE => "WRONG_TYPE",
            Status::OUT_OF_RANGE => "OUT_OF_RANGE",
            Status::BAD_STATE => "BAD_STATE",
            Status::TIMED_OUT => "TIMED_OUT",
            Status::SHOULD_WAIT => "SHOULD_WAIT",
            Status::CANCELED => "CANCELED",
            Status::PEER_CLOSED => "PEER_CLOSED",
            Status::NOT_FOUND => "NOT_FOUND",
            Status::ALREADY_EXISTS => "ALREADY_EXISTS",
            Status::UNAVAILABLE => "UNAVAILABLE",
            Status::ACCESS_DENIED => "ACCESS_DENIED",
            Status::IO => "IO",
            _ => return None,
        })
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Status::{name}"),
            None => write!(f, "Status({})", self.0),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "status {}", self.0),
        }
    }
}

impl From<i32> for Status {
    fn from(raw: i32) -> Self {
        Status(raw)
    }
}

impl From<Status> for i32 {
    fn from(status: Status) -> i32 {
        status.0
    }
}
