use crate::newtypes::slug_newtype;
use std::collections::BTreeMap;

slug_newtype!(
    /// The name of a configuration variable.
    ///
    /// Names double as file names below the build root's `env/` directory, so they are restricted
    /// to the portable environment variable alphabet.
    ConfigVarName,
    /// An error that occurred when parsing a `ConfigVarName` from a `String`.
    ConfigVarNameError,
    r"^[A-Za-z_][A-Za-z0-9_]*$"
);

/// Configuration variables of an application, keyed by name.
pub type ConfigVars = BTreeMap<ConfigVarName, String>;
