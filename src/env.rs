//! Inference configuration and the environment variables that control it.

use std::fmt;
use std::str::FromStr;

/// Interpret a string value such as "1" or "no" as a boolean.
pub fn str_as_bool(s: &str) -> bool {
    match s {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => {
            tracing::warn!("Unrecognized boolean value \"{}\"", s);
            false
        }
    }
}

/// Return whether a feature flag controlled by an environment variable is
/// enabled.
pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .as_ref()
        .map(|s| str_as_bool(s))
        .unwrap_or(default)
}

/// How permissive the engine is about constructs that can only be handled by
/// deferring to the host runtime.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SyntaxLevel {
    /// Unsupported constructs are compile errors.
    Strict,
    /// Constant constructs are interpreted, others are errors.
    Compatible,
    /// Anything that cannot be inferred statically is deferred to runtime.
    #[default]
    Lax,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParseSyntaxLevelError(String);

impl fmt::Display for ParseSyntaxLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown syntax level \"{}\"", self.0)
    }
}

impl std::error::Error for ParseSyntaxLevelError {}

impl FromStr for SyntaxLevel {
    type Err = ParseSyntaxLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "0" | "strict" => Ok(SyntaxLevel::Strict),
            "1" | "compatible" => Ok(SyntaxLevel::Compatible),
            "2" | "lax" => Ok(SyntaxLevel::Lax),
            _ => Err(ParseSyntaxLevelError(s.to_string())),
        }
    }
}

/// Options that control abstract evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct InferConfig {
    /// Never attach a supposed element type to `Any` results produced by
    /// host-script nodes.
    pub force_any: bool,

    /// Track which elements of tuples and lists are consumed, so unused
    /// elements can be eliminated later.
    pub element_usage_tracking: bool,

    pub syntax_level: SyntaxLevel,

    /// Mark nodes which create primitives with memory or IO effects as
    /// side-effecting.
    pub check_side_effect: bool,

    /// Maximum nesting of node evaluations before giving up.
    pub max_eval_depth: usize,
}

impl Default for InferConfig {
    fn default() -> Self {
        InferConfig {
            force_any: false,
            element_usage_tracking: true,
            syntax_level: SyntaxLevel::Lax,
            check_side_effect: true,
            max_eval_depth: 4096,
        }
    }
}

impl InferConfig {
    /// Read the configuration from `ABSINT_*` environment variables, using
    /// defaults for any that are unset.
    pub fn from_env() -> Self {
        let defaults = InferConfig::default();
        let syntax_level = match std::env::var("ABSINT_SYNTAX_LEVEL") {
            Ok(level) => level.parse().unwrap_or_else(|err| {
                tracing::warn!("{}, using {:?}", err, defaults.syntax_level);
                defaults.syntax_level
            }),
            Err(_) => defaults.syntax_level,
        };

        InferConfig {
            force_any: env_flag("ABSINT_FALLBACK_FORCE_ANY", defaults.force_any),
            element_usage_tracking: env_flag(
                "ABSINT_ENABLE_DDE",
                defaults.element_usage_tracking,
            ),
            syntax_level,
            check_side_effect: env_flag("ABSINT_CHECK_SIDE_EFFECT", defaults.check_side_effect),
            max_eval_depth: defaults.max_eval_depth,
        }
    }

    /// Return true if constructs which cannot be inferred statically may be
    /// deferred to the host runtime.
    pub fn allow_runtime_fallback(&self) -> bool {
        self.syntax_level == SyntaxLevel::Lax
    }
}
