pub mod policy;
pub mod shell;

pub use policy::{CommandPolicy, PolicyError};
pub use shell::{ShellConfig, ShellError, ShellExecutor, ShellResult};
