//! Package manager engine: detection, preference resolution, installation
//! with retry and fallback, and post-install verification.

pub mod detect;
pub mod error;
pub mod fallback;
pub mod install;
pub mod metrics;
pub mod preference;
pub mod registry;
pub mod runner;
pub mod session;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;

pub use detect::{DetectedManager, Detector, HostEnv};
pub use error::{PmError, Result};
pub use fallback::{FallbackEngine, FallbackLog, OptimizationFallback};
pub use install::{InstallTarget, Installer};
pub use metrics::InstallReport;
pub use preference::{PreferenceStore, UserPreferences};
pub use registry::{InstallContext, ManagerDescriptor, Registry};
pub use runner::{CommandRunner, CommandSpec, SystemRunner};
pub use session::{InstallOutcome, PmSession, Resolution, ResolutionSource};
pub use verify::{InstallationSummary, VerificationResult, VerifyOptions};
