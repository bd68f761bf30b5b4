use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;

use indicatif::ProgressBar;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::gcp::gce::types::Instance;
use crate::provision::error::{MissingNetworkInfo, ProvisionError};
use crate::provision::probe::{ReadinessPolicy, ReadinessProbe};
use crate::provision::{ComputeApi, InstanceRequest, Stage};

const SPINNER_TICK: Duration = Duration::from_millis(120);

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// Created and answering HTTP 200 at this address.
    Ready(IpAddr),
    /// An instance with that name was already there; nothing was changed.
    AlreadyExists,
}

/// Drives one instance from "absent" to "serving HTTP".
pub struct Orchestrator<C, P> {
    compute: C,
    probe: P,
    policy: ReadinessPolicy,
    progress: ProgressBar,
}

impl<C: ComputeApi, P: ReadinessProbe> Orchestrator<C, P> {
    pub fn new(compute: C, probe: P, policy: ReadinessPolicy) -> Self {
        Self {
            compute,
            probe,
            policy,
            progress: ProgressBar::hidden(),
        }
    }

    /// Ticks `progress` once per failed readiness probe. The bar is left
    /// alone until polling starts, so log lines before that stay unbroken.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn compute(&self) -> &C {
        &self.compute
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    /// Creates `request.name` unless it exists, then waits for it to serve HTTP.
    pub async fn ensure_instance(
        &self,
        request: &InstanceRequest,
        cancel: &CancellationToken,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let name = request.name.as_str();
        let zone = request.zone.as_str();

        let exists = cancellable(
            cancel,
            Stage::CheckingExistence,
            self.compute.instance_exists(zone, name),
        )
        .await?
        .map_err(|e| ProvisionError::provider(Stage::CheckingExistence, e))?;
        if exists {
            tracing::info!(instance = name, zone, "VM {} already exists", name);
            return Ok(ProvisionOutcome::AlreadyExists);
        }

        tracing::info!(instance = name, zone, "Creating VM {}...", name);
        let operation = cancellable(cancel, Stage::Creating, self.compute.create_instance(request))
            .await?
            .map_err(|e| ProvisionError::CreationFailed {
                name: name.to_string(),
                reason: format!("{:#}", e),
            })?;

        tracing::info!(operation = %operation.name, "Polling operation {}...", operation.id);
        let done = cancellable(
            cancel,
            Stage::AwaitingOperation,
            self.compute.wait_operation(&operation),
        )
        .await?
        .map_err(|e| ProvisionError::provider(Stage::AwaitingOperation, e))?;
        if let Some(reason) = done.error_message() {
            return Err(ProvisionError::CreationFailed {
                name: name.to_string(),
                reason,
            });
        }
        if !done.is_done() {
            return Err(ProvisionError::provider(
                Stage::AwaitingOperation,
                anyhow::anyhow!("operation {} returned in state {:?}", done.name, done.status),
            ));
        }

        tracing::info!(instance = name, "Acquiring VM metadata...");
        let instance = cancellable(
            cancel,
            Stage::FetchingMetadata,
            self.compute.get_instance(zone, name),
        )
        .await?
        .map_err(|e| ProvisionError::provider(Stage::FetchingMetadata, e))?;
        let ip = external_ip(&instance).map_err(|missing| ProvisionError::MissingNetworkInfo {
            name: name.to_string(),
            missing,
        })?;
        tracing::info!(instance = name, %ip, "Booting new VM with IP http://{}...", ip);

        let attempts = self.await_readiness(ip, cancel).await?;
        tracing::info!(instance = name, %ip, attempts, "{} created successfully", name);
        Ok(ProvisionOutcome::Ready(ip))
    }

    /// Returns the number of probes it took to see a 200.
    async fn await_readiness(
        &self,
        ip: IpAddr,
        cancel: &CancellationToken,
    ) -> Result<u32, ProvisionError> {
        self.progress.reset_elapsed();
        self.progress.set_message(format!("waiting for http://{}/", ip));
        if !self.progress.is_hidden() {
            self.progress.enable_steady_tick(SPINNER_TICK);
        }
        let result = self.poll_until_ready(ip, cancel).await;
        self.progress.finish_and_clear();
        result
    }

    async fn poll_until_ready(
        &self,
        ip: IpAddr,
        cancel: &CancellationToken,
    ) -> Result<u32, ProvisionError> {
        let policy = self.policy;
        let started = Instant::now();
        let mut attempts = 0u32;

        let timed_out = |attempts: u32| ProvisionError::ReadinessTimeout {
            ip,
            attempts,
            elapsed: started.elapsed(),
        };

        loop {
            if attempts >= policy.max_attempts {
                return Err(timed_out(attempts));
            }
            cancellable(cancel, Stage::PollingReady, tokio::time::sleep(policy.interval)).await?;
            if let Some(limit) = policy.timeout
                && started.elapsed() >= limit
            {
                return Err(timed_out(attempts));
            }

            attempts += 1;
            match cancellable(cancel, Stage::PollingReady, self.probe.probe(ip)).await? {
                Ok(()) => return Ok(attempts),
                Err(failure) => {
                    tracing::debug!(%ip, attempt = attempts, %failure, "not ready yet");
                    self.progress.inc(1);
                }
            }
        }
    }
}

/// Reads `networkInterfaces[0].accessConfigs[0].natIP`, naming the first missing step.
pub fn external_ip(instance: &Instance) -> Result<IpAddr, MissingNetworkInfo> {
    let interface = instance
        .network_interfaces
        .first()
        .ok_or(MissingNetworkInfo::NoNetworkInterface)?;
    let access = interface
        .access_configs
        .first()
        .ok_or(MissingNetworkInfo::NoAccessConfig)?;
    let nat_ip = access
        .nat_ip
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(MissingNetworkInfo::NoExternalIp)?;
    nat_ip
        .parse()
        .map_err(|_| MissingNetworkInfo::InvalidAddress(nat_ip.to_string()))
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    stage: Stage,
    fut: impl Future<Output = T>,
) -> Result<T, ProvisionError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled { stage }),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::gcp::gce::types::Operation;
    use crate::provision::probe::ProbeFailure;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Exists,
        Create,
        Wait,
        GetInstance,
    }

    struct FakeCompute {
        exists: bool,
        reject_create: bool,
        operation_error: Option<&'static str>,
        instance: serde_json::Value,
        calls: Mutex<Vec<Call>>,
    }

    impl FakeCompute {
        fn new() -> Self {
            Self {
                exists: false,
                reject_create: false,
                operation_error: None,
                instance: json!({
                    "name": "goldfish-app",
                    "networkInterfaces": [{"accessConfigs": [{"natIP": "203.0.113.5"}]}]
                }),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ComputeApi for FakeCompute {
        async fn instance_exists(&self, _zone: &str, _name: &str) -> Result<bool> {
            self.record(Call::Exists);
            Ok(self.exists)
        }

        async fn create_instance(&self, _request: &InstanceRequest) -> Result<Operation> {
            self.record(Call::Create);
            if self.reject_create {
                bail!("Failed to create instance (status 403 Forbidden): denied");
            }
            Ok(serde_json::from_value(json!({
                "id": "42",
                "name": "operation-42",
                "status": "RUNNING",
                "zone": "https://www.googleapis.com/compute/v1/projects/p/zones/us-west1-b"
            }))?)
        }

        async fn wait_operation(&self, operation: &Operation) -> Result<Operation> {
            self.record(Call::Wait);
            let mut value = json!({"id": operation.id, "name": operation.name, "status": "DONE"});
            if let Some(message) = self.operation_error {
                value["error"] = json!({"errors": [{"code": "QUOTA_EXCEEDED", "message": message}]});
            }
            Ok(serde_json::from_value(value)?)
        }

        async fn get_instance(&self, _zone: &str, _name: &str) -> Result<Instance> {
            self.record(Call::GetInstance);
            Ok(serde_json::from_value(self.instance.clone())?)
        }
    }

    /// Replays scripted statuses, then keeps failing with 503.
    struct ScriptedProbe {
        script: Mutex<VecDeque<u16>>,
        probed_at: Mutex<Vec<Instant>>,
    }

    impl ScriptedProbe {
        fn new(statuses: &[u16]) -> Self {
            Self {
                script: Mutex::new(statuses.iter().copied().collect()),
                probed_at: Mutex::new(Vec::new()),
            }
        }

        fn never_ready() -> Self {
            Self::new(&[])
        }

        fn probed_at(&self) -> Vec<Instant> {
            self.probed_at.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReadinessProbe for ScriptedProbe {
        async fn probe(&self, _ip: IpAddr) -> Result<(), ProbeFailure> {
            self.probed_at.lock().unwrap().push(Instant::now());
            match self.script.lock().unwrap().pop_front() {
                Some(200) => Ok(()),
                Some(0) => Err(ProbeFailure::Transport("connection refused".to_string())),
                Some(status) => Err(ProbeFailure::Status(status)),
                None => Err(ProbeFailure::Status(503)),
            }
        }
    }

    fn request() -> InstanceRequest {
        InstanceRequest::new("goldfish-app", "us-west1-b").with_startup_script("#! /bin/bash\n")
    }

    fn policy(max_attempts: u32, timeout: Option<Duration>) -> ReadinessPolicy {
        ReadinessPolicy {
            interval: Duration::from_secs(2),
            max_attempts,
            timeout,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn goldfish_app_becomes_ready_after_three_probes() {
        let orchestrator = Orchestrator::new(
            FakeCompute::new(),
            ScriptedProbe::new(&[503, 503, 200]),
            ReadinessPolicy::default(),
        );
        let outcome = orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ProvisionOutcome::Ready("203.0.113.5".parse().unwrap())
        );
        assert_eq!(orchestrator.probe().probed_at().len(), 3);
        assert_eq!(
            orchestrator.compute().calls(),
            vec![Call::Exists, Call::Create, Call::Wait, Call::GetInstance]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn existing_instance_is_left_alone() {
        let mut compute = FakeCompute::new();
        compute.exists = true;
        let orchestrator =
            Orchestrator::new(compute, ScriptedProbe::new(&[200]), ReadinessPolicy::default());
        let outcome = orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, ProvisionOutcome::AlreadyExists);
        assert_eq!(orchestrator.compute().calls(), vec![Call::Exists]);
        assert!(orchestrator.probe().probed_at().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_touched_only_while_polling() {
        let mut compute = FakeCompute::new();
        compute.exists = true;
        let bar = ProgressBar::hidden();
        let orchestrator =
            Orchestrator::new(compute, ScriptedProbe::new(&[200]), ReadinessPolicy::default())
                .with_progress(bar.clone());
        orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bar.message(), "");
        assert!(!bar.is_finished());

        let bar = ProgressBar::hidden();
        let orchestrator = Orchestrator::new(
            FakeCompute::new(),
            ScriptedProbe::new(&[503, 503, 200]),
            ReadinessPolicy::default(),
        )
        .with_progress(bar.clone());
        orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(bar.message(), "waiting for http://203.0.113.5/");
        assert_eq!(bar.position(), 2);
        assert!(bar.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_operation_skips_metadata_and_polling() {
        let mut compute = FakeCompute::new();
        compute.operation_error = Some("Quota 'CPUS' exceeded.");
        let orchestrator =
            Orchestrator::new(compute, ScriptedProbe::new(&[200]), ReadinessPolicy::default());
        let err = orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProvisionError::CreationFailed { name, reason } => {
                assert_eq!(name, "goldfish-app");
                assert!(reason.contains("QUOTA_EXCEEDED"), "{}", reason);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(
            orchestrator.compute().calls(),
            vec![Call::Exists, Call::Create, Call::Wait]
        );
        assert!(orchestrator.probe().probed_at().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_create_is_creation_failed() {
        let mut compute = FakeCompute::new();
        compute.reject_create = true;
        let orchestrator =
            Orchestrator::new(compute, ScriptedProbe::new(&[200]), ReadinessPolicy::default());
        let err = orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::CreationFailed { .. }), "{:?}", err);
        assert_eq!(err.exit_code(), 1);
        assert_eq!(orchestrator.compute().calls(), vec![Call::Exists, Call::Create]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_access_config_is_reported() {
        let mut compute = FakeCompute::new();
        compute.instance = json!({"name": "goldfish-app", "networkInterfaces": [{"networkIP": "10.0.0.2"}]});
        let orchestrator =
            Orchestrator::new(compute, ScriptedProbe::new(&[200]), ReadinessPolicy::default());
        let err = orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                ProvisionError::MissingNetworkInfo {
                    missing: MissingNetworkInfo::NoAccessConfig,
                    ..
                }
            ),
            "{:?}",
            err
        );
        assert!(orchestrator.probe().probed_at().is_empty());

        let mut compute = FakeCompute::new();
        compute.instance = json!({"name": "goldfish-app"});
        let orchestrator =
            Orchestrator::new(compute, ScriptedProbe::new(&[200]), ReadinessPolicy::default());
        let err = orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::MissingNetworkInfo {
                missing: MissingNetworkInfo::NoNetworkInterface,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn k_failures_then_ready_spaced_by_interval() {
        // 0 is a transport error; it counts the same as a bad status.
        let orchestrator = Orchestrator::new(
            FakeCompute::new(),
            ScriptedProbe::new(&[0, 404, 0, 502, 200]),
            policy(100, None),
        );
        let started = Instant::now();
        let outcome = orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, ProvisionOutcome::Ready(_)));

        let probed_at = orchestrator.probe().probed_at();
        assert_eq!(probed_at.len(), 5);
        assert_eq!(probed_at[0] - started, Duration::from_secs(2));
        for pair in probed_at.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(2));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_stops_at_max_attempts() {
        let orchestrator =
            Orchestrator::new(FakeCompute::new(), ScriptedProbe::never_ready(), policy(5, None));
        let err = orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProvisionError::ReadinessTimeout { ip, attempts, elapsed } => {
                assert_eq!(ip, "203.0.113.5".parse::<IpAddr>().unwrap());
                assert_eq!(attempts, 5);
                assert_eq!(elapsed, Duration::from_secs(10));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(orchestrator.probe().probed_at().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_stops_at_wall_clock_timeout() {
        let orchestrator = Orchestrator::new(
            FakeCompute::new(),
            ScriptedProbe::never_ready(),
            policy(1000, Some(Duration::from_secs(7))),
        );
        let err = orchestrator
            .ensure_instance(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProvisionError::ReadinessTimeout { attempts: 3, .. }),
            "{:?}",
            err
        );
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let orchestrator = Orchestrator::new(
            FakeCompute::new(),
            ScriptedProbe::never_ready(),
            ReadinessPolicy::default(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let err = orchestrator
            .ensure_instance(&request(), &cancel)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProvisionError::Cancelled { stage: Stage::PollingReady }),
            "{:?}",
            err
        );
        assert_eq!(orchestrator.probe().probed_at().len(), 2);
    }

    #[test]
    fn external_ip_rejects_garbage() {
        let instance: Instance = serde_json::from_value(json!({
            "networkInterfaces": [{"accessConfigs": [{"natIP": "not-an-ip"}]}]
        }))
        .unwrap();
        assert_eq!(
            external_ip(&instance),
            Err(MissingNetworkInfo::InvalidAddress("not-an-ip".to_string()))
        );

        let instance: Instance = serde_json::from_value(json!({
            "networkInterfaces": [{"accessConfigs": [{"name": "External NAT"}]}]
        }))
        .unwrap();
        assert_eq!(external_ip(&instance), Err(MissingNetworkInfo::NoExternalIp));
    }
}
