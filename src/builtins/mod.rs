pub mod shared;

pub mod cd;
pub mod echo;
pub mod jobs;
pub mod pwd;
pub mod set;

mod prelude {
    pub use super::shared::*;
    pub use libc::c_int;

    #[allow(unused_imports)]
    pub(crate) use crate::{
        flog::{FLOG, FLOGF},
        io::IoStreams,
    };
}
