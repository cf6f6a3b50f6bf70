// for docs on the 'failure' crate see https://boats.gitlab.io/failure/intro.html

use std::io;

#[derive(Debug, Fail)]
pub enum CDBError {
    #[fail(display = "operation attempted on a closed handle")]
    ClosedHandle,

    #[fail(display = "format error: {}", msg)]
    FormatError { msg: String },

    #[fail(display = "io error: {}", cause)]
    IoError { #[cause] cause: io::Error },

    #[fail(display = "overflow: {}", msg)]
    Overflow { msg: String },

    #[fail(display = "type error: {}", msg)]
    TypeError { msg: String },

    #[fail(display = "builder is poisoned by a prior error")]
    PoisonedBuilder,
}

impl From<io::Error> for CDBError {
    fn from(e: io::Error) -> Self {
        CDBError::IoError { cause: e }
    }
}

impl CDBError {
    pub fn format_error<S: Into<String>>(msg: S) -> CDBError {
        CDBError::FormatError { msg: msg.into() }
    }

    pub fn overflow<S: Into<String>>(msg: S) -> CDBError {
        CDBError::Overflow { msg: msg.into() }
    }
}
