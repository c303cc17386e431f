//! Provisioning states of a bare-metal host.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{HostClient, HostRef};
use crate::engine::{FetchFuture, ResourceFetcher};
use crate::error::OperationError;

/// Where a bare-metal host is in its lifecycle.
///
/// Names match what the provisioning API reports. Hosts can move backwards
/// (for example `Provisioned` to `Deprovisioning` to `Available`), so no
/// ordering is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// Not reconciled yet; a freshly created host reports an empty state.
    #[serde(rename = "")]
    None,
    /// Not yet managed by the operator.
    #[serde(rename = "unmanaged")]
    Unmanaged,
    /// Controller credentials are being validated.
    #[serde(rename = "registering")]
    Registering,
    /// Hardware is being inspected.
    #[serde(rename = "inspecting")]
    Inspecting,
    /// Matching the host against a hardware profile.
    #[serde(rename = "match profile")]
    MatchProfile,
    /// Hardware settings are being applied.
    #[serde(rename = "preparing")]
    Preparing,
    /// Ready to be provisioned.
    #[serde(rename = "available")]
    Available,
    /// An image is being written.
    #[serde(rename = "provisioning")]
    Provisioning,
    /// Running the provisioned image.
    #[serde(rename = "provisioned")]
    Provisioned,
    /// Provisioned by something other than the operator.
    #[serde(rename = "externally provisioned")]
    ExternallyProvisioned,
    /// The image is being removed.
    #[serde(rename = "deprovisioning")]
    Deprovisioning,
    /// Powered off ahead of deletion.
    #[serde(rename = "powering off before delete")]
    PoweringOffBeforeDelete,
    /// The host object is being deleted.
    #[serde(rename = "deleting")]
    Deleting,
    /// The operator gave up on the host.
    #[serde(rename = "error")]
    Error,
    /// Kept in the inventory while the operator no longer manages it.
    #[serde(rename = "detached")]
    Detached,
}

const STATE_NAMES: [(ProvisioningState, &str); 15] = [
    (ProvisioningState::None, ""),
    (ProvisioningState::Unmanaged, "unmanaged"),
    (ProvisioningState::Registering, "registering"),
    (ProvisioningState::Inspecting, "inspecting"),
    (ProvisioningState::MatchProfile, "match profile"),
    (ProvisioningState::Preparing, "preparing"),
    (ProvisioningState::Available, "available"),
    (ProvisioningState::Provisioning, "provisioning"),
    (ProvisioningState::Provisioned, "provisioned"),
    (ProvisioningState::ExternallyProvisioned, "externally provisioned"),
    (ProvisioningState::Deprovisioning, "deprovisioning"),
    (ProvisioningState::PoweringOffBeforeDelete, "powering off before delete"),
    (ProvisioningState::Deleting, "deleting"),
    (ProvisioningState::Error, "error"),
    (ProvisioningState::Detached, "detached"),
];

impl ProvisioningState {
    /// The name the provisioning API uses for this state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        STATE_NAMES
            .iter()
            .find(|(state, _)| *state == self)
            .map_or("unknown", |(_, name)| name)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisioningState {
    type Err = OperationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim();
        STATE_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(wanted))
            .map(|(state, _)| *state)
            .ok_or_else(|| OperationError::Malformed {
                resource: String::from("provisioning state"),
                message: format!("unknown state '{wanted}'"),
            })
    }
}

/// Adapts a [`HostClient`] into a [`ResourceFetcher`] for one host.
pub struct HostStateFetcher<C: ?Sized> {
    client: Arc<C>,
    host: HostRef,
}

impl<C: ?Sized> HostStateFetcher<C> {
    /// Watch `host` through `client`.
    #[must_use]
    pub const fn new(client: Arc<C>, host: HostRef) -> Self {
        Self { client, host }
    }
}

impl<C> ResourceFetcher for HostStateFetcher<C>
where
    C: HostClient + ?Sized,
{
    type State = ProvisioningState;

    fn resource(&self) -> String {
        format!("host '{}/{}'", self.host.namespace, self.host.name)
    }

    fn fetch(&self) -> FetchFuture<'_, ProvisioningState> {
        self.client.host_state(&self.host)
    }
}
