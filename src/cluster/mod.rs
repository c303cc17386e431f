//! Collaborator contracts for the cluster being upgraded.
//!
//! The engine never talks to a cluster itself. Everything it needs (applying
//! manifests, reading rollout progress, managing namespaces, secrets and
//! bare-metal hosts) is expressed as a small trait here, returning boxed
//! futures so implementations can be real API clients or `mockall` mocks.
//!
//! Implementations copy what they need out of borrowed arguments before
//! returning; the futures borrow only `self`.

mod provisioning;

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;

use crate::error::OperationError;

pub use provisioning::{HostStateFetcher, ProvisioningState};

/// Boxed future returned by every collaborator method.
pub type ClusterFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, OperationError>> + Send + 'a>>;

/// A buildable manifest bundle, such as a kustomization directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRef {
    /// Short name used in logs.
    pub name: String,
    /// Location of the bundle.
    pub path: Utf8PathBuf,
}

impl ManifestRef {
    /// Reference the bundle at `path`, named after its final component.
    #[must_use]
    pub fn from_path(path: impl Into<Utf8PathBuf>) -> Self {
        let bundle: Utf8PathBuf = path.into();
        let name = bundle
            .file_name()
            .map_or_else(|| String::from(bundle.as_str()), |file| file.replace('.', "-"));
        Self { name, path: bundle }
    }
}

/// A namespaced deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRef {
    /// Namespace of the deployment.
    pub namespace: String,
    /// Name of the deployment.
    pub name: String,
}

impl DeploymentRef {
    /// Reference `name` in `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// An opaque secret to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    /// Namespace of the secret.
    pub namespace: String,
    /// Name of the secret.
    pub name: String,
    /// String data entries.
    pub data: BTreeMap<String, String>,
}

/// A namespaced bare-metal host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRef {
    /// Namespace of the host.
    pub namespace: String,
    /// Name of the host.
    pub name: String,
}

/// A bare-metal host to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    /// Where the host lives.
    pub host: HostRef,
    /// Address of the host's management controller.
    pub bmc_address: String,
    /// Secret holding the controller credentials.
    pub credentials_name: String,
    /// Skip TLS verification when talking to the controller.
    pub disable_certificate_verification: bool,
    /// MAC address of the provisioning NIC.
    pub boot_mac_address: String,
    /// Whether the host should be powered on.
    pub online: bool,
    /// Annotations to set on the host object.
    pub annotations: BTreeMap<String, String>,
}

/// Applies and removes manifest bundles.
pub trait ManifestApplier: Send + Sync {
    /// Build and apply a bundle. Applying the same bundle twice is harmless.
    fn apply(&self, manifest: &ManifestRef) -> ClusterFuture<'_, ()>;

    /// Build a bundle and delete everything it contains.
    fn remove(&self, manifest: &ManifestRef) -> ClusterFuture<'_, ()>;
}

/// Reads deployment rollout progress.
pub trait RolloutObserver: Send + Sync {
    /// The generation the deployment controller has most recently observed.
    fn observed_generation(&self, deployment: &DeploymentRef) -> ClusterFuture<'_, i64>;

    /// Whether the deployment has rolled out at `min_generation` or later.
    fn rolled_out(&self, deployment: &DeploymentRef, min_generation: i64)
    -> ClusterFuture<'_, bool>;

    /// Whether the named Ironic instance reports itself ready.
    fn ironic_ready(&self, ironic: &DeploymentRef) -> ClusterFuture<'_, bool>;
}

/// Creates and deletes namespaces.
pub trait NamespaceClient: Send + Sync {
    /// Create a namespace. An already existing namespace is not an error.
    fn create_namespace(&self, name: &str) -> ClusterFuture<'_, ()>;

    /// Request deletion of a namespace.
    fn delete_namespace(&self, name: &str) -> ClusterFuture<'_, ()>;

    /// Whether the namespace still exists, terminating or not.
    fn namespace_exists(&self, name: &str) -> ClusterFuture<'_, bool>;
}

/// Creates secrets.
pub trait SecretClient: Send + Sync {
    /// Create a secret.
    fn create_secret(&self, secret: &SecretSpec) -> ClusterFuture<'_, ()>;
}

/// Manages bare-metal hosts.
pub trait HostClient: Send + Sync {
    /// Register a host.
    fn create_host(&self, host: &HostSpec) -> ClusterFuture<'_, ()>;

    /// Give a registered host the image and settings it needs to provision.
    fn patch_for_provisioning(&self, host: &HostRef) -> ClusterFuture<'_, ()>;

    /// The host's current provisioning state.
    fn host_state(&self, host: &HostRef) -> ClusterFuture<'_, ProvisioningState>;
}

/// Health checks of an installed cert-manager.
pub trait CertManagerClient: Send + Sync {
    /// Succeeds once the admission webhook accepts requests.
    fn webhook_ready(&self) -> ClusterFuture<'_, ()>;

    /// Succeeds when the cert-manager API groups are served.
    fn api_available(&self) -> ClusterFuture<'_, ()>;
}

/// Everything the upgrade plan needs from a cluster.
pub trait UpgradeCluster:
    ManifestApplier
    + RolloutObserver
    + NamespaceClient
    + SecretClient
    + HostClient
    + CertManagerClient
{
}

impl<T> UpgradeCluster for T where
    T: ManifestApplier
        + RolloutObserver
        + NamespaceClient
        + SecretClient
        + HostClient
        + CertManagerClient
        + ?Sized
{
}
