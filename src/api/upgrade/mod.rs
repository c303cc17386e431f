//! The operator and Ironic upgrade procedure.
//!
//! [`UpgradePlan::build`] turns an [`UpgradeInput`] into a [`FlowSpec`]. The
//! flow can first prepare the cluster with cert-manager and the Ironic
//! standalone operator. It installs the old release of the operator and
//! Ironic, registers a bare-metal host that is kept from provisioning, waits
//! for it to become available and upgrades one component. Provisioning the
//! host afterwards proves the upgraded component still manages it.
//!
//! Waits read their cadence from the `[intervals]` table: `upgrade` for the
//! host waits, `ironic` for rollouts and `default` for everything else.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::FlowSpec;
use crate::cluster::{
    DeploymentRef, HostRef, HostSpec, HostStateFetcher, ManifestRef, ProvisioningState,
    SecretSpec, UpgradeCluster,
};
use crate::config::AppConfig;
use crate::engine::{
    CancelToken, CleanupAction, ConditionPoller, Handoff, Operation, PollSpec, Probe,
    ResourceStateWaiter, RetryPolicy, Step,
};
use crate::error::{OperationError, Result};

/// Namespace the operator and Ironic are installed into.
pub const OPERATOR_NAMESPACE: &str = "baremetal-operator-system";
/// Name of the bare-metal host the procedure registers.
pub const HOST_NAME: &str = "upgrade";
/// Name of the secret holding the controller credentials.
pub const CREDENTIALS_SECRET: &str = "bmc-credentials";

const OPERATOR_DEPLOYMENT: &str = "baremetal-operator-controller-manager";
const IRONIC_DEPLOYMENT: &str = "ironic-service";
const IRONIC_INSTANCE: &str = "ironic";
const IRSO_NAMESPACE: &str = "ironic-standalone-operator-system";
const IRSO_DEPLOYMENT: &str = "ironic-standalone-operator-controller-manager";
const INSPECT_ANNOTATION: &str = "inspect.metal3.io";
const HARDWARE_DETAILS_ANNOTATION: &str = "inspect.metal3.io/hardwaredetails";
const SCENARIO: &str = "upgrade";

/// The component being upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeEntity {
    /// The bare-metal operator.
    Operator,
    /// The Ironic provisioning service.
    Ironic,
}

impl UpgradeEntity {
    /// Short name used in step and namespace names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Ironic => "ironic",
        }
    }

    /// The deployment that rolls out when this component is upgraded.
    #[must_use]
    pub fn deployment(self) -> DeploymentRef {
        let name = match self {
            Self::Operator => OPERATOR_DEPLOYMENT,
            Self::Ironic => IRONIC_DEPLOYMENT,
        };
        DeploymentRef::new(OPERATOR_NAMESPACE, name)
    }
}

impl fmt::Display for UpgradeEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details of the test host's management controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmcDetails {
    /// Controller address, including the driver scheme.
    pub address: String,
    /// Controller user name.
    pub user: String,
    /// Controller password.
    pub password: String,
    /// Skip TLS verification when talking to the controller.
    pub disable_certificate_verification: bool,
    /// MAC address of the provisioning NIC.
    pub boot_mac_address: String,
}

/// Everything one upgrade run needs besides configuration.
#[derive(Debug, Clone)]
pub struct UpgradeInput {
    /// Which component to upgrade.
    pub entity: UpgradeEntity,
    /// Install cert-manager from this bundle before anything else.
    pub cert_manager_manifest: Option<ManifestRef>,
    /// Install the Ironic standalone operator from this bundle.
    pub irso_manifest: Option<ManifestRef>,
    /// Install Ironic from `init_ironic_manifest` first.
    pub deploy_ironic: bool,
    /// Install the operator from `init_operator_manifest` first.
    pub deploy_operator: bool,
    /// Initial Ironic release.
    pub init_ironic_manifest: ManifestRef,
    /// Initial operator release.
    pub init_operator_manifest: ManifestRef,
    /// Release to upgrade `entity` to.
    pub upgrade_manifest: ManifestRef,
    /// The test host's controller.
    pub bmc: BmcDetails,
    /// Hardware details annotation so inspection can be skipped.
    pub hardware_details: String,
    /// On a reused cluster, remove this bundle once the run is over.
    pub teardown_manifest: Option<ManifestRef>,
}

impl UpgradeInput {
    /// The bundle the upgraded component starts from.
    #[must_use]
    pub const fn upgrade_from(&self) -> &ManifestRef {
        match self.entity {
            UpgradeEntity::Operator => &self.init_operator_manifest,
            UpgradeEntity::Ironic => &self.init_ironic_manifest,
        }
    }

    /// Name of the flow, such as `ironic-upgrade-from-release-0-9`.
    #[must_use]
    pub fn flow_name(&self) -> String {
        format!("{}-upgrade-from-{}", self.entity, self.upgrade_from().name)
    }

    /// Namespace the test host lives in.
    #[must_use]
    pub fn namespace(&self) -> String {
        format!("upgrade-{}", self.entity)
    }
}

/// Builds the upgrade flow.
#[derive(Debug)]
pub struct UpgradePlan;

impl UpgradePlan {
    /// Assemble the steps of one upgrade run.
    ///
    /// Cleanup settings and the flow deadline come from `config`, as do the
    /// retry budget for manifest applies and every wait's cadence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a resolved interval entry or
    /// the retry section is invalid. No cluster call is made before the flow
    /// runs.
    pub fn build(
        input: &UpgradeInput,
        config: &AppConfig,
        cluster: Arc<dyn UpgradeCluster>,
    ) -> Result<FlowSpec> {
        let planner = Planner {
            retry: config.retry_policy()?,
            deployment_wait: config.intervals("default", "wait-deployment")?,
            rollout_wait: config.intervals("ironic", "wait-deployment")?,
            namespace_wait: config.intervals("default", "wait-namespace-deleted")?,
            webhook_wait: config.intervals("default", "wait-available")?,
            available_wait: config.intervals(SCENARIO, "wait-available")?,
            provisioned_wait: config.intervals(SCENARIO, "wait-provisioned")?,
            cluster,
        };
        info!(
            flow = %input.flow_name(),
            entity = %input.entity,
            upgrade_to = %input.upgrade_manifest.path,
            "planning upgrade"
        );
        Ok(FlowSpec {
            steps: planner.steps(input),
            teardown: planner.teardown(input).into_iter().collect(),
            ..FlowSpec::from_config(input.flow_name(), config)
        })
    }
}

struct Planner {
    cluster: Arc<dyn UpgradeCluster>,
    retry: RetryPolicy,
    deployment_wait: PollSpec,
    rollout_wait: PollSpec,
    namespace_wait: PollSpec,
    webhook_wait: PollSpec,
    available_wait: PollSpec,
    provisioned_wait: PollSpec,
}

impl Planner {
    /// On a reused cluster the initial bundle is removed once everything
    /// else is gone, and the operator namespace must disappear with it.
    fn teardown(&self, input: &UpgradeInput) -> Option<CleanupAction> {
        input.teardown_manifest.as_ref().map(|bundle| {
            CleanupAction::new(
                format!("remove-{}", bundle.name),
                remove_and_await_namespace(
                    &self.cluster,
                    bundle,
                    OPERATOR_NAMESPACE,
                    self.namespace_wait,
                ),
            )
        })
    }

    fn prepare_cluster(&self, input: &UpgradeInput, steps: &mut Vec<Step>) {
        if let Some(bundle) = &input.cert_manager_manifest {
            steps.push(Step::invoke("install-cert-manager", apply(&self.cluster, bundle)));
            steps.push(Step::poll(
                "await-cert-manager-webhook",
                self.webhook_wait,
                cert_manager_webhook(&self.cluster),
            ));
            steps.push(Step::invoke(
                "check-cert-manager-api",
                cert_manager_api(&self.cluster),
            ));
        }
        if let Some(bundle) = &input.irso_manifest {
            steps.push(Step::invoke_then_poll(
                "install-irso",
                apply(&self.cluster, bundle),
                self.deployment_wait,
                rolled_out(
                    &self.cluster,
                    DeploymentRef::new(IRSO_NAMESPACE, IRSO_DEPLOYMENT),
                    None,
                ),
            ));
        }
    }

    fn steps(&self, input: &UpgradeInput) -> Vec<Step> {
        let mut steps = Vec::new();
        let entity = input.entity;
        let namespace = input.namespace();
        let host = HostRef {
            namespace: namespace.clone(),
            name: String::from(HOST_NAME),
        };

        self.prepare_cluster(input, &mut steps);

        if input.deploy_ironic {
            steps.push(Step::invoke(
                "install-ironic",
                apply(&self.cluster, &input.init_ironic_manifest),
            ));
            steps.push(Step::poll(
                "await-ironic-installed",
                self.rollout_wait,
                ironic_ready(&self.cluster),
            ));
        }

        if input.deploy_operator {
            // A slow rollout repeats the apply as well as the wait.
            steps.push(
                Step::invoke_then_poll(
                    "install-operator",
                    apply(&self.cluster, &input.init_operator_manifest),
                    self.deployment_wait,
                    rolled_out(
                        &self.cluster,
                        UpgradeEntity::Operator.deployment(),
                        None,
                    ),
                )
                .with_retry(self.retry.clone()),
            );
        }

        steps.push(
            Step::invoke("create-namespace", create_namespace(&self.cluster, &namespace))
                .with_cleanup(
                    format!("delete-namespace-{namespace}"),
                    delete_and_await_namespace(&self.cluster, &namespace, self.namespace_wait),
                ),
        );
        steps.push(Step::invoke(
            "create-bmc-secret",
            create_secret(&self.cluster, credentials_secret(&namespace, &input.bmc)),
        ));
        steps.push(Step::invoke(
            "create-host",
            create_host(&self.cluster, host_spec(&host, input)),
        ));
        steps.push(Step::await_state(
            "await-host-available",
            ResourceStateWaiter::new(self.available_wait),
            HostStateFetcher::new(Arc::clone(&self.cluster), host.clone()),
            ProvisioningState::Available,
        ));

        let generation = Handoff::new(&format!("{entity}-observed-generation"));
        steps.push(Step::invoke(
            format!("record-{entity}-generation"),
            record_generation(&self.cluster, entity.deployment(), generation.clone()),
        ));
        steps.push(
            Step::invoke(
                format!("upgrade-{entity}"),
                apply(&self.cluster, &input.upgrade_manifest),
            )
            .with_retry(self.retry.clone()),
        );
        steps.push(Step::poll(
            format!("await-{entity}-rollout"),
            self.rollout_wait,
            rolled_out(&self.cluster, entity.deployment(), Some(generation)),
        ));
        if entity == UpgradeEntity::Ironic {
            steps.push(Step::poll(
                "await-ironic-ready",
                self.rollout_wait,
                ironic_ready(&self.cluster),
            ));
        }

        steps.push(Step::poll(
            "patch-host-for-provisioning",
            self.deployment_wait,
            patch_host(&self.cluster, host.clone()),
        ));
        steps.push(Step::await_state(
            "await-host-provisioned",
            ResourceStateWaiter::new(self.provisioned_wait),
            HostStateFetcher::new(Arc::clone(&self.cluster), host),
            ProvisioningState::Provisioned,
        ));
        steps
    }
}

fn credentials_secret(namespace: &str, bmc: &BmcDetails) -> SecretSpec {
    SecretSpec {
        namespace: String::from(namespace),
        name: String::from(CREDENTIALS_SECRET),
        data: BTreeMap::from([
            (String::from("username"), bmc.user.clone()),
            (String::from("password"), bmc.password.clone()),
        ]),
    }
}

/// The host is registered with inspection disabled, so it stops at
/// `available` until it is patched for provisioning.
fn host_spec(host: &HostRef, input: &UpgradeInput) -> HostSpec {
    HostSpec {
        host: host.clone(),
        bmc_address: input.bmc.address.clone(),
        credentials_name: String::from(CREDENTIALS_SECRET),
        disable_certificate_verification: input.bmc.disable_certificate_verification,
        boot_mac_address: input.bmc.boot_mac_address.clone(),
        online: true,
        annotations: BTreeMap::from([
            (String::from(INSPECT_ANNOTATION), String::from("disabled")),
            (
                String::from(HARDWARE_DETAILS_ANNOTATION),
                input.hardware_details.clone(),
            ),
        ]),
    }
}

fn apply(cluster: &Arc<dyn UpgradeCluster>, manifest: &ManifestRef) -> impl Operation + 'static {
    let shared = Arc::clone(cluster);
    let bundle = manifest.clone();
    move || {
        let client = Arc::clone(&shared);
        let target = bundle.clone();
        async move {
            info!(manifest = %target.name, path = %target.path, "applying manifest");
            client.apply(&target).await
        }
    }
}

fn create_namespace(cluster: &Arc<dyn UpgradeCluster>, name: &str) -> impl Operation + 'static {
    let shared = Arc::clone(cluster);
    let namespace = String::from(name);
    move || {
        let client = Arc::clone(&shared);
        let target = namespace.clone();
        async move { client.create_namespace(&target).await }
    }
}

fn create_secret(cluster: &Arc<dyn UpgradeCluster>, secret: SecretSpec) -> impl Operation + 'static {
    let shared = Arc::clone(cluster);
    move || {
        let client = Arc::clone(&shared);
        let target = secret.clone();
        async move { client.create_secret(&target).await }
    }
}

fn create_host(cluster: &Arc<dyn UpgradeCluster>, spec: HostSpec) -> impl Operation + 'static {
    let shared = Arc::clone(cluster);
    move || {
        let client = Arc::clone(&shared);
        let target = spec.clone();
        async move { client.create_host(&target).await }
    }
}

fn record_generation(
    cluster: &Arc<dyn UpgradeCluster>,
    deployment: DeploymentRef,
    slot: Handoff<i64>,
) -> impl Operation + 'static {
    let shared = Arc::clone(cluster);
    move || {
        let client = Arc::clone(&shared);
        let target = deployment.clone();
        let store = slot.clone();
        async move {
            let generation = client.observed_generation(&target).await?;
            debug!(deployment = %target.name, generation, "recorded observed generation");
            store.set(generation);
            Ok::<(), OperationError>(())
        }
    }
}

/// Probe for a completed rollout.
///
/// With a recorded generation the rollout must reach the generation after
/// it; without one any generation will do.
fn rolled_out(
    cluster: &Arc<dyn UpgradeCluster>,
    deployment: DeploymentRef,
    recorded: Option<Handoff<i64>>,
) -> impl Probe + 'static {
    let shared = Arc::clone(cluster);
    move || {
        let client = Arc::clone(&shared);
        let target = deployment.clone();
        let minimum = recorded.as_ref().map_or(Ok(0), |slot| {
            slot.get()
                .map(|generation| generation.saturating_add(1))
                .map_err(|error| OperationError::terminal(error.to_string()))
        });
        async move { client.rolled_out(&target, minimum?).await }
    }
}

/// Webhook errors only mean cert-manager is still starting.
fn cert_manager_webhook(cluster: &Arc<dyn UpgradeCluster>) -> impl Probe + 'static {
    let shared = Arc::clone(cluster);
    move || {
        let client = Arc::clone(&shared);
        async move {
            let ready = client.webhook_ready().await.map_or_else(
                |error| {
                    debug!(error = %error, "cert-manager webhook not ready");
                    false
                },
                |()| true,
            );
            Ok::<bool, OperationError>(ready)
        }
    }
}

fn cert_manager_api(cluster: &Arc<dyn UpgradeCluster>) -> impl Operation + 'static {
    let shared = Arc::clone(cluster);
    move || {
        let client = Arc::clone(&shared);
        async move { client.api_available().await }
    }
}

fn ironic_ready(cluster: &Arc<dyn UpgradeCluster>) -> impl Probe + 'static {
    let shared = Arc::clone(cluster);
    move || {
        let client = Arc::clone(&shared);
        async move {
            client
                .ironic_ready(&DeploymentRef::new(OPERATOR_NAMESPACE, IRONIC_INSTANCE))
                .await
        }
    }
}

/// The admission webhook can lag the rollout, so a rejected patch is
/// retried until the poll times out.
fn patch_host(cluster: &Arc<dyn UpgradeCluster>, host: HostRef) -> impl Probe + 'static {
    let shared = Arc::clone(cluster);
    move || {
        let client = Arc::clone(&shared);
        let target = host.clone();
        async move {
            let accepted = client.patch_for_provisioning(&target).await.map_or_else(
                |error| {
                    debug!(host = %target.name, error = %error, "host patch rejected");
                    false
                },
                |()| true,
            );
            Ok::<bool, OperationError>(accepted)
        }
    }
}

fn delete_and_await_namespace(
    cluster: &Arc<dyn UpgradeCluster>,
    name: &str,
    spec: PollSpec,
) -> impl Operation + 'static {
    let shared = Arc::clone(cluster);
    let namespace = String::from(name);
    move || {
        let client = Arc::clone(&shared);
        let target = namespace.clone();
        async move {
            match client.delete_namespace(&target).await {
                Ok(()) | Err(OperationError::NotFound { .. }) => {}
                Err(error) => return Err(error),
            }
            await_namespace_gone(client.as_ref(), &target, spec).await
        }
    }
}

fn remove_and_await_namespace(
    cluster: &Arc<dyn UpgradeCluster>,
    manifest: &ManifestRef,
    namespace: &'static str,
    spec: PollSpec,
) -> impl Operation + 'static {
    let shared = Arc::clone(cluster);
    let bundle = manifest.clone();
    move || {
        let client = Arc::clone(&shared);
        let target = bundle.clone();
        async move {
            client.remove(&target).await?;
            await_namespace_gone(client.as_ref(), namespace, spec).await
        }
    }
}

/// Teardown waits ignore flow cancellation; only their own timeout ends them.
async fn await_namespace_gone(
    client: &dyn UpgradeCluster,
    namespace: &str,
    spec: PollSpec,
) -> std::result::Result<(), OperationError> {
    let never = CancelToken::never();
    ConditionPoller::new(spec)
        .poll(
            &format!("namespace '{namespace}' to be deleted"),
            &never,
            || async move { client.namespace_exists(namespace).await.map(|exists| !exists) },
        )
        .await
        .map_err(|error| OperationError::terminal(error.to_string()))
}
