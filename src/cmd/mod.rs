//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                       |
//! |-----------|----------------------------------------|
//! | `status`  | `Status`, `Recover`                    |
//! | `inspect` | `Signal`, `Segment`, `Instruction`     |
//! | `config`  | `Config`                               |

pub mod config;
pub mod inspect;
pub mod status;

pub use config::cmd_config;
pub use inspect::{cmd_instruction, cmd_segment, cmd_signal};
pub use status::{cmd_recover, cmd_status};
