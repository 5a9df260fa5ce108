//! Error types for proxy planning and intercepted calls.

use std::fmt;

/// Interception errors
///
/// Registration-time failures (`UnsupportedProxyTarget`, `MissingOverrideMethod`,
/// `NullArgument`, `MissingMethodTarget`, `ShapeMismatch`) are fatal and surface
/// from [`ProxyPlanner::plan`](crate::ProxyPlanner::plan) before any call is served.
/// `TargetShape` is raised there too when a synchronous member is bound to an
/// async target. The remaining variants describe container resolution and
/// call-time misuse.
///
/// # Examples
///
/// ```rust
/// use ferrous_intercept::InterceptError;
///
/// let unsupported = InterceptError::UnsupportedProxyTarget {
///     service: "app::Clock",
///     reason: "service type is sealed",
/// };
/// let missing = InterceptError::MissingOverrideMethod {
///     implementation: "app::SystemClock",
///     member: "now()".to_string(),
/// };
///
/// println!("Error: {}", unsupported);
/// println!("Error: {}", missing);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptError {
    /// Sealed class, value type, or a service/implementation pair that cannot be proxied
    UnsupportedProxyTarget {
        service: &'static str,
        reason: &'static str,
    },
    /// Implementation has no member matching a service member's signature
    MissingOverrideMethod {
        implementation: &'static str,
        member: String,
    },
    /// A required input was absent
    NullArgument(&'static str),
    /// A proxied member has no callable target to forward to
    MissingMethodTarget(String),
    /// Strict validation: a marker's capability does not fit the member's return shape
    ShapeMismatch { member: String, marker: &'static str },
    /// Service not registered
    NotFound(&'static str),
    /// Type downcast failed
    TypeMismatch(&'static str),
    /// Invalid lifetime resolution (e.g., scoped from root)
    WrongLifetime(&'static str),
    /// Proxy has no member with this identity
    UnknownMember { service: &'static str, member: String },
    /// Sync entry point used for an async member, or a sync member bound to an async target
    TargetShape(String),
    /// Argument position out of range
    ArgumentIndex { index: usize, len: usize },
    /// Write-back requested for a position not passed by reference
    NotByRef(usize),
    /// Options could not be loaded
    Config(String),
}

impl fmt::Display for InterceptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptError::UnsupportedProxyTarget { service, reason } => {
                write!(f, "Cannot proxy {}: {}", service, reason)
            }
            InterceptError::MissingOverrideMethod { implementation, member } => {
                write!(f, "{} has no member matching {}", implementation, member)
            }
            InterceptError::NullArgument(what) => write!(f, "Missing required input: {}", what),
            InterceptError::MissingMethodTarget(member) => {
                write!(f, "No method target declared for {}", member)
            }
            InterceptError::ShapeMismatch { member, marker } => {
                write!(f, "Marker {} cannot run on {}", marker, member)
            }
            InterceptError::NotFound(name) => write!(f, "Service not found: {}", name),
            InterceptError::TypeMismatch(name) => write!(f, "Type mismatch for: {}", name),
            InterceptError::WrongLifetime(msg) => write!(f, "Lifetime error: {}", msg),
            InterceptError::UnknownMember { service, member } => {
                write!(f, "{} has no proxied member {}", service, member)
            }
            InterceptError::TargetShape(msg) => write!(f, "Call shape error: {}", msg),
            InterceptError::ArgumentIndex { index, len } => {
                write!(f, "Argument {} out of range ({} arguments)", index, len)
            }
            InterceptError::NotByRef(position) => {
                write!(f, "Argument {} is not passed by reference", position)
            }
            InterceptError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for InterceptError {}

/// Result type for planning and container operations
pub type InterceptResult<T> = Result<T, InterceptError>;

/// Boxed error carried through intercepted calls.
///
/// Errors raised by a real method body or by a marker travel through the chain
/// as-is; callers downcast them back to their concrete type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for intercepted calls
pub type CallResult<T> = Result<T, BoxError>;
