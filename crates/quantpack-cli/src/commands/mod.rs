//! Commands - CLI Command Implementations
//!
//! One module per subcommand, plus shared output helpers.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

pub mod decode;
pub mod encode;
pub mod inspect;
pub mod list;
pub mod stats;
pub mod utils;
