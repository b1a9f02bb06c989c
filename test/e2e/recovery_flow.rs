//! End-to-end recovery test.
//!
//! One monitor poll against a cluster where one host has gone silent,
//! followed by the chosen agent rebuilding the VM, verifying:
//!
//! 1. The silent host is classified dead, the reporting host alive
//! 2. The reporting compute host is chosen as destination
//! 3. The recovery request reaches that host's agent
//! 4. The agent attaches the network, defines and starts the domain
//! 5. The inventory places the VM on the destination
//!
//! ## Running
//!
//! ```bash
//! cargo test -p revive-e2e --test recovery_flow
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use revive_agent::api::{self, IngressState};
use revive_agent::domain::VirshHypervisor;
use revive_agent::network::HostNetworkAttacher;
use revive_agent::{MockCommandRunner, RecoverManager, RecoveryState, StepFailurePolicy, VmRecovery};
use revive_bus::{host_topic, Caster, HttpCaster, LocalBus, RecoverVmRequest};
use revive_id::{HostId, InstanceUuid};
use revive_inventory::{Instance, Inventory, SqliteInventory};
use revive_monitor::monitor::RecoveryMonitor;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

const THRESHOLD: Duration = Duration::from_secs(60);
const VM_UUID: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";
const PORT_ID: &str = "3b9a6c1e-77f2-4c4b-9d0e-6a1c2f8e9b10";
const VM_NAME: &str = "instance-0000002a";

const NETWORK_INFO: &str = r#"[{"id": "3b9a6c1e-77f2-4c4b-9d0e-6a1c2f8e9b10", "address": "fa:16:3e:01:02:03", "network": {"bridge": "br-int", "label": "private"}, "type": "ovs"}]"#;

const DESCRIPTOR: &str = r#"<domain type="kvm">
  <name>instance-0000002a</name>
  <devices>
    <interface type="bridge">
      <mac address="fa:16:3e:01:02:03"/>
      <source bridge="qbr3b9a6c1e-77"/>
      <filterref filter="nova-instance-instance-0000002a-fa163e010203">
        <parameter name="IP" value="10.0.0.5"/>
      </filterref>
    </interface>
  </devices>
</domain>
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("revive=debug")
        .with_test_writer()
        .try_init();
}

fn host(name: &str) -> HostId {
    HostId::parse(name).unwrap()
}

fn vm_uuid() -> InstanceUuid {
    VM_UUID.parse().unwrap()
}

/// H1 last seen 120s ago and hosting V1; H2 fresh and compute-capable.
struct Cluster {
    now: DateTime<Utc>,
    inventory: Arc<SqliteInventory>,
    instances: TempDir,
}

impl Cluster {
    async fn new() -> Self {
        let now = Utc::now();
        let inventory = Arc::new(SqliteInventory::open_in_memory().unwrap());
        let h1 = host("h1");
        let h2 = host("h2");

        for (h, seen) in [(&h1, now - TimeDelta::seconds(120)), (&h2, now)] {
            inventory.report_service_heartbeat(h, "recover", seen).await.unwrap();
            inventory.report_service_heartbeat(h, "compute", seen).await.unwrap();
        }

        inventory
            .insert_instance(&Instance {
                uuid: vm_uuid(),
                name: VM_NAME.to_string(),
                host: Some(h1.clone()),
                launched_on: Some(h1),
            })
            .unwrap();
        inventory.set_network_info(&vm_uuid(), NETWORK_INFO).unwrap();

        let instances = TempDir::new().unwrap();
        std::fs::create_dir(instances.path().join(VM_NAME)).unwrap();
        std::fs::write(descriptor_path(&instances), DESCRIPTOR).unwrap();

        Self {
            now,
            inventory,
            instances,
        }
    }

    fn monitor(&self, caster: Arc<dyn Caster>) -> RecoveryMonitor {
        RecoveryMonitor::new(self.inventory.clone(), caster, THRESHOLD, "recover", "compute")
    }

    fn agent(&self, runner: Arc<MockCommandRunner>) -> RecoverManager {
        let recovery = VmRecovery::new(
            host("h2"),
            Arc::new(HostNetworkAttacher::new(runner.clone())),
            Arc::new(VirshHypervisor::new(runner)),
            self.inventory.clone(),
        )
        .with_instances_path(self.instances.path())
        .with_policy(StepFailurePolicy::Abort);
        RecoverManager::new(recovery)
    }

    fn placement(&self) -> Option<HostId> {
        self.inventory
            .get_instance(&vm_uuid())
            .unwrap()
            .and_then(|instance| instance.host)
    }
}

fn descriptor_path(instances: &TempDir) -> PathBuf {
    instances.path().join(VM_NAME).join("libvirt.xml")
}

#[tokio::test]
async fn test_dead_host_vm_recovered_on_survivor() {
    init_tracing();
    let cluster = Cluster::new().await;

    let bus = Arc::new(LocalBus::new());
    let mut h2_queue = bus.subscribe(&host_topic("recover", &host("h2"))).await;
    let mut monitor = cluster.monitor(bus.clone());

    // 1-3: one poll classifies, schedules and dispatches
    let stats = monitor.poll_once(cluster.now).await.unwrap();
    assert_eq!(stats.hosts_alive, 1);
    assert_eq!(stats.hosts_newly_dead, 1);
    assert_eq!(stats.vms_dispatched, 1);
    assert!(monitor.detector().is_known_dead(&host("h1")));

    let message = h2_queue.try_recv().unwrap();
    let request: RecoverVmRequest = serde_json::from_value(message.args.clone()).unwrap();
    assert_eq!(request.port_id.to_string(), PORT_ID);
    assert_eq!(request.port_mac.as_str(), "fa:16:3e:01:02:03");
    assert_eq!(request.vm_uuid, vm_uuid());
    assert_eq!(request.vm_name, VM_NAME);

    // 4-5: the agent on h2 executes it
    let runner = Arc::new(MockCommandRunner::new());
    let report = cluster.agent(runner.clone()).handle(message).await.unwrap();
    assert_eq!(report.state, RecoveryState::LocationCommitted);

    let executed = runner.executed();
    let define = executed
        .iter()
        .position(|c| c.starts_with("virsh define"))
        .unwrap();
    let start = executed
        .iter()
        .position(|c| c.starts_with("virsh start"))
        .unwrap();
    let attach = executed
        .iter()
        .position(|c| c.starts_with("ovs-vsctl"))
        .unwrap();
    assert!(attach < define && define < start);
    assert_eq!(executed.len(), 11);

    let descriptor = std::fs::read_to_string(descriptor_path(&cluster.instances)).unwrap();
    assert!(!descriptor.contains("filterref"));
    assert_eq!(cluster.placement(), Some(host("h2")));

    // A second poll does not dispatch again
    let stats = monitor.poll_once(cluster.now).await.unwrap();
    assert_eq!(stats.hosts_newly_dead, 0);
    assert!(h2_queue.try_recv().is_err());
}

#[tokio::test]
async fn test_recovery_over_http_ingress() {
    init_tracing();
    let cluster = Cluster::new().await;

    // Agent on h2: ingress -> queue -> recover manager
    let runner = Arc::new(MockCommandRunner::new());
    let (queue_tx, queue_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let manager = tokio::spawn(cluster.agent(runner.clone()).run(queue_rx, shutdown_rx));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router(IngressState {
        host: host("h2"),
        base_topic: "recover".to_string(),
        queue: queue_tx,
    });
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // Every host resolves to the local ingress
    let caster = Arc::new(HttpCaster::new("recover", &format!("http://{addr}")).unwrap());
    let mut monitor = cluster.monitor(caster);

    let stats = monitor.poll_once(cluster.now).await.unwrap();
    assert_eq!(stats.vms_dispatched, 1);
    assert_eq!(stats.vms_failed, 0);

    // The cast is acknowledged before the recovery runs
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while cluster.placement() != Some(host("h2")) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "recovery did not commit in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(runner
        .executed()
        .contains(&format!("virsh start {VM_NAME}")));

    shutdown_tx.send(true).unwrap();
    manager.await.unwrap();
    server.abort();
}

#[tokio::test]
async fn test_no_eligible_destination_leaves_vm_in_place() {
    init_tracing();
    let now = Utc::now();

    // h2 is alive but not a compute host
    let inventory = Arc::new(SqliteInventory::open_in_memory().unwrap());
    inventory
        .report_service_heartbeat(&host("h1"), "recover", now - TimeDelta::seconds(120))
        .await
        .unwrap();
    inventory
        .report_service_heartbeat(&host("h2"), "recover", now)
        .await
        .unwrap();
    inventory
        .insert_instance(&Instance {
            uuid: vm_uuid(),
            name: VM_NAME.to_string(),
            host: Some(host("h1")),
            launched_on: Some(host("h1")),
        })
        .unwrap();
    inventory.set_network_info(&vm_uuid(), NETWORK_INFO).unwrap();

    let bus = Arc::new(LocalBus::new());
    let mut h2_queue = bus.subscribe(&host_topic("recover", &host("h2"))).await;
    let mut monitor =
        RecoveryMonitor::new(inventory.clone(), bus, THRESHOLD, "recover", "compute");

    let stats = monitor.poll_once(now).await.unwrap();
    assert_eq!(stats.hosts_newly_dead, 1);
    assert_eq!(stats.vms_dispatched, 0);
    assert_eq!(stats.vms_failed, 1);
    assert!(h2_queue.try_recv().is_err());

    let instance = inventory.get_instance(&vm_uuid()).unwrap().unwrap();
    assert_eq!(instance.host, Some(host("h1")));
}
