use crate::enums::ValType;

/// Basic error types, one variant per subsystem that can fail.
#[derive(Debug)]
pub enum DasError {
    /// IoError from the std library.
    StdIoError(std::io::Error),
    /// Utf8Error from the std library.
    TryFromUtf8(std::string::FromUtf8Error),
    /// A malformed stream: bad tags, bad XML, missing attributes.
    Serial { msg: String },
    /// Codec mis-configuration or a decode/encode failure.
    Enc { msg: String },
    /// A shape or append problem in a dynamic array.
    Array { msg: String },
    /// A variable cannot satisfy the request.
    Var { msg: String },
    /// A dimension-level problem, e.g. a role collision.
    Dim { msg: String },
    /// A frame or vector problem.
    Vec { msg: String },
    /// A property problem on a descriptor.
    Desc { msg: String },
    /// A value conversion failure.
    Value { msg: String },
    /// A dataset-level problem, e.g. an array/codec mismatch.
    Dataset { msg: String },
    /// Detected but deliberately unsupported input.
    NotImp { what: String },
    /// The buffer encoding cannot be stored in the given array type.
    UnsupportedStorage {
        enc: String,
        item_bytes: i16,
        vt: ValType,
    },
    /// A packet id was redefined on a stream that forbids it.
    PktIdCollision { id: u16 },
    /// Enum creation error.
    ParseEnum { f: String, code: i32 },
}

impl From<std::io::Error> for DasError {
    fn from(e: std::io::Error) -> Self {
        Self::StdIoError(e)
    }
}

impl From<std::string::FromUtf8Error> for DasError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Self::TryFromUtf8(e)
    }
}

impl std::fmt::Display for DasError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use self::DasError::*;
        match self {
            StdIoError(x) => write!(fmt, "{}", x),
            TryFromUtf8(x) => write!(fmt, "{}", x),
            Serial { msg } => write!(fmt, "Malformed stream: {}", msg),
            Enc { msg } => write!(fmt, "Codec error: {}", msg),
            Array { msg } => write!(fmt, "Array error: {}", msg),
            Var { msg } => write!(fmt, "Variable error: {}", msg),
            Dim { msg } => write!(fmt, "Dimension error: {}", msg),
            Vec { msg } => write!(fmt, "Vector error: {}", msg),
            Desc { msg } => write!(fmt, "Property error: {}", msg),
            Value { msg } => write!(fmt, "Value conversion failed: {}", msg),
            Dataset { msg } => write!(fmt, "Dataset error: {}", msg),
            NotImp { what } => write!(fmt, "{} is not implemented", what),
            UnsupportedStorage { enc, item_bytes, vt } => write!(
                fmt,
                "Cannot store {}-byte '{}' encoded values in an array of {} elements",
                item_bytes, enc, vt
            ),
            PktIdCollision { id } => {
                write!(fmt, "Packet id {} is already defined on this stream", id)
            }
            ParseEnum { f, code } => write!(fmt, "Could not parse source ({}) to {}.", code, f),
        }
    }
}

impl From<DasError> for String {
    fn from(e: DasError) -> String {
        e.to_string()
    }
}

impl std::error::Error for DasError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use self::DasError::*;
        match self {
            StdIoError(x) => x.source(),
            TryFromUtf8(x) => x.source(),
            _ => None,
        }
    }
}

impl DasError {
    /// Log the error and abort the process.
    ///
    /// Simple filter programs that have no recovery strategy may use this as
    /// their whole error policy; library code always returns instead.
    pub fn die(self) -> ! {
        log::error!("{}", self);
        std::process::exit(13);
    }
}
