//! Integration tests for the recovery flow.
//!
//! These tests run the whole state machine against:
//! 1. A mock command runner standing in for brctl/ip/ovs-vsctl/virsh
//! 2. A temporary instances directory holding the domain descriptor
//! 3. An in-memory inventory

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use revive_agent::command::{CommandOutput, CommandRunner, HostCommand};
use revive_agent::domain::VirshHypervisor;
use revive_agent::network::HostNetworkAttacher;
use revive_agent::{
    MockCommandRunner, RecoverManager, RecoveryState, RecoveryStep, StepFailurePolicy, VmRecovery,
};
use revive_bus::{CastMessage, RecoverVmRequest};
use revive_id::{HostId, InstanceUuid};
use revive_inventory::{Instance, SqliteInventory};
use revive_networking::MacAddress;
use rstest::rstest;
use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

const VM_UUID: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";
const PORT_ID: &str = "3b9a6c1e-77f2-4c4b-9d0e-6a1c2f8e9b10";
const VM_NAME: &str = "instance-0000002a";

const DESCRIPTOR: &str = r#"<domain type="kvm">
  <name>instance-0000002a</name>
  <devices>
    <interface type="bridge">
      <mac address="fa:16:3e:01:02:03"/>
      <source bridge="qbr3b9a6c1e-77"/>
      <filterref filter="nova-instance-instance-0000002a-fa163e010203"/>
    </interface>
  </devices>
</domain>
"#;

struct Fixture {
    _dir: TempDir,
    instances_path: std::path::PathBuf,
    inventory: Arc<SqliteInventory>,
    runner: Arc<MockCommandRunner>,
}

impl Fixture {
    fn new(runner: MockCommandRunner) -> Self {
        let dir = TempDir::new().unwrap();
        let instances_path = dir.path().to_path_buf();
        std::fs::create_dir(instances_path.join(VM_NAME)).unwrap();
        std::fs::write(instances_path.join(VM_NAME).join("libvirt.xml"), DESCRIPTOR).unwrap();

        let inventory = Arc::new(SqliteInventory::open_in_memory().unwrap());
        inventory
            .insert_instance(&Instance {
                uuid: vm_uuid(),
                name: VM_NAME.to_string(),
                host: Some(host("compute-1")),
                launched_on: Some(host("compute-1")),
            })
            .unwrap();

        Self {
            _dir: dir,
            instances_path,
            inventory,
            runner: Arc::new(runner),
        }
    }

    fn recovery(&self, policy: StepFailurePolicy) -> VmRecovery {
        self.recovery_with(self.runner.clone(), policy)
    }

    fn recovery_with(&self, runner: Arc<dyn CommandRunner>, policy: StepFailurePolicy) -> VmRecovery {
        VmRecovery::new(
            host("compute-2"),
            Arc::new(HostNetworkAttacher::new(runner.clone())),
            Arc::new(VirshHypervisor::new(runner)),
            self.inventory.clone(),
        )
        .with_instances_path(&self.instances_path)
        .with_policy(policy)
    }

    fn descriptor(&self) -> String {
        std::fs::read_to_string(self.instances_path.join(VM_NAME).join("libvirt.xml")).unwrap()
    }

    fn placement(&self) -> (Option<HostId>, Option<HostId>) {
        let instance = self.inventory.get_instance(&vm_uuid()).unwrap().unwrap();
        (instance.host, instance.launched_on)
    }

    fn virsh_commands(&self) -> Vec<String> {
        self.runner
            .executed()
            .into_iter()
            .filter(|c| c.starts_with("virsh"))
            .collect()
    }
}

fn host(name: &str) -> HostId {
    HostId::parse(name).unwrap()
}

fn vm_uuid() -> InstanceUuid {
    VM_UUID.parse().unwrap()
}

fn request() -> RecoverVmRequest {
    RecoverVmRequest {
        port_id: PORT_ID.parse().unwrap(),
        port_mac: MacAddress::parse("fa:16:3e:01:02:03").unwrap(),
        vm_uuid: vm_uuid(),
        vm_name: VM_NAME.to_string(),
    }
}

#[tokio::test]
async fn test_recovery_succeeds() {
    let fixture = Fixture::new(MockCommandRunner::new());

    let report = fixture
        .recovery(StepFailurePolicy::Abort)
        .run(&request())
        .await;

    assert!(report.is_success());
    assert_eq!(report.state, RecoveryState::LocationCommitted);
    assert_eq!(report.attempted, RecoveryStep::ALL.to_vec());
    assert!(report.failures.is_empty());

    let executed = fixture.runner.executed();
    assert_eq!(executed.len(), 11);
    assert_eq!(executed[0], "brctl addbr qbr3b9a6c1e-77");
    assert!(executed[8].starts_with("ovs-vsctl -- --may-exist add-port br-int qvo3b9a6c1e-77"));
    assert_eq!(
        fixture.virsh_commands(),
        vec![
            format!(
                "virsh define {}",
                fixture.instances_path.join(VM_NAME).join("libvirt.xml").display()
            ),
            format!("virsh start {VM_NAME}"),
        ]
    );

    assert!(!fixture.descriptor().contains("filterref"));
    assert_eq!(
        fixture.placement(),
        (Some(host("compute-2")), Some(host("compute-2")))
    );
}

#[rstest]
#[case::abort(StepFailurePolicy::Abort, vec![RecoveryStep::AttachNetwork, RecoveryStep::DefineDomain, RecoveryStep::StartDomain], "compute-1")]
#[case::continue_all(StepFailurePolicy::Continue, RecoveryStep::ALL.to_vec(), "compute-2")]
#[tokio::test]
async fn test_start_failure(
    #[case] policy: StepFailurePolicy,
    #[case] attempted: Vec<RecoveryStep>,
    #[case] placed_on: &str,
) {
    let fixture = Fixture::new(MockCommandRunner::failing_on("start").with_stderr("error: Failed to start domain"));

    let report = fixture.recovery(policy).run(&request()).await;

    assert_eq!(
        report.state,
        RecoveryState::Failed {
            step: RecoveryStep::StartDomain
        }
    );
    assert_eq!(report.failed_step(), Some(RecoveryStep::StartDomain));
    assert_eq!(report.attempted, attempted);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(fixture.placement().0, Some(host(placed_on)));
}

#[tokio::test]
async fn test_network_failure_skips_domain_steps() {
    let fixture = Fixture::new(MockCommandRunner::failing_on("ovs-vsctl").with_stderr("ovs-vsctl: unix:/var/run/openvswitch/db.sock: database connection failed"));

    let report = fixture
        .recovery(StepFailurePolicy::Abort)
        .run(&request())
        .await;

    assert_eq!(
        report.state,
        RecoveryState::Failed {
            step: RecoveryStep::AttachNetwork
        }
    );
    assert!(fixture.virsh_commands().is_empty());
    // Descriptor untouched
    assert!(fixture.descriptor().contains("filterref"));
    assert_eq!(fixture.placement().0, Some(host("compute-1")));
}

#[tokio::test]
async fn test_continue_records_every_failure() {
    let fixture = Fixture::new(MockCommandRunner::failing_on("virsh"));

    let report = fixture
        .recovery(StepFailurePolicy::Continue)
        .run(&request())
        .await;

    // First failure decides the terminal state
    assert_eq!(report.failed_step(), Some(RecoveryStep::DefineDomain));
    let failed: Vec<_> = report.failures.iter().map(|f| f.step).collect();
    assert_eq!(failed, vec![RecoveryStep::DefineDomain, RecoveryStep::StartDomain]);
}

#[tokio::test]
async fn test_missing_descriptor_fails_define() {
    let fixture = Fixture::new(MockCommandRunner::new());
    std::fs::remove_file(fixture.instances_path.join(VM_NAME).join("libvirt.xml")).unwrap();

    let report = fixture
        .recovery(StepFailurePolicy::Abort)
        .run(&request())
        .await;

    assert_eq!(report.failed_step(), Some(RecoveryStep::DefineDomain));
    assert!(fixture.virsh_commands().is_empty());
}

#[tokio::test]
async fn test_unknown_instance_fails_commit() {
    let fixture = Fixture::new(MockCommandRunner::new());
    let mut request = request();
    request.vm_uuid = InstanceUuid::new();

    let report = fixture
        .recovery(StepFailurePolicy::Abort)
        .run(&request)
        .await;

    assert_eq!(report.failed_step(), Some(RecoveryStep::CommitLocation));
    assert_eq!(fixture.virsh_commands().len(), 2);
}

#[tokio::test]
async fn test_manager_survives_bad_messages() {
    let fixture = Fixture::new(MockCommandRunner::new());
    let manager = RecoverManager::new(fixture.recovery(StepFailurePolicy::Abort));

    let (tx, rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    tx.send(CastMessage {
        method: "reboot_vm".to_string(),
        version: "1.0".to_string(),
        args: serde_json::json!({}),
    })
    .await
    .unwrap();
    tx.send(CastMessage {
        method: "recover_vm".to_string(),
        version: "1.0".to_string(),
        args: serde_json::json!({"vm_uuid": "truncated"}),
    })
    .await
    .unwrap();
    tx.send(CastMessage::recover_vm(&request()).unwrap())
        .await
        .unwrap();
    drop(tx);

    // Returns once the queue is drained and closed
    manager.run(rx, shutdown_rx).await;

    assert_eq!(fixture.placement().0, Some(host("compute-2")));
    assert_eq!(fixture.runner.executed().len(), 11);
}

#[tokio::test]
async fn test_manager_stops_on_shutdown() {
    let fixture = Fixture::new(MockCommandRunner::new());
    let manager = RecoverManager::new(fixture.recovery(StepFailurePolicy::Abort));

    let (_tx, rx) = mpsc::channel::<CastMessage>(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(manager.run(rx, shutdown_rx));
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert!(fixture.runner.executed().is_empty());
}

/// Emulates a host that keeps devices between runs and answers with the
/// errors the real tools print for objects that already exist. The first
/// `virsh define` fails.
#[derive(Default)]
struct StatefulHost {
    devices: Mutex<HashSet<String>>,
    enslaved: Mutex<HashSet<String>>,
    defines: Mutex<usize>,
}

impl StatefulHost {
    fn fail(stderr: String) -> io::Result<CommandOutput> {
        Ok(CommandOutput {
            status: 1,
            stdout: String::new(),
            stderr,
        })
    }
}

#[async_trait]
impl CommandRunner for StatefulHost {
    async fn run(&self, command: &HostCommand) -> io::Result<CommandOutput> {
        let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
        match (command.program.as_str(), args.as_slice()) {
            ("brctl", ["addbr", bridge]) => {
                if !self.devices.lock().unwrap().insert(bridge.to_string()) {
                    return Self::fail(format!(
                        "device {bridge} already exists; can't create bridge with the same name"
                    ));
                }
            }
            ("ip", ["link", "add", name, ..]) => {
                if !self.devices.lock().unwrap().insert(name.to_string()) {
                    return Self::fail("RTNETLINK answers: File exists".to_string());
                }
            }
            ("brctl", ["addif", bridge, device]) => {
                if !self.enslaved.lock().unwrap().insert(device.to_string()) {
                    return Self::fail(format!(
                        "device {device} is already a member of a bridge; can't enslave it to bridge {bridge}."
                    ));
                }
            }
            ("virsh", ["define", ..]) => {
                let mut defines = self.defines.lock().unwrap();
                *defines += 1;
                if *defines == 1 {
                    return Self::fail("error: Failed to define domain".to_string());
                }
            }
            _ => {}
        }
        Ok(CommandOutput::default())
    }
}

#[tokio::test]
async fn test_rerun_after_partial_recovery() {
    let fixture = Fixture::new(MockCommandRunner::new());
    let host_runner = Arc::new(StatefulHost::default());
    let recovery = fixture.recovery_with(host_runner.clone(), StepFailurePolicy::Abort);

    let first = recovery.run(&request()).await;
    assert_eq!(first.failed_step(), Some(RecoveryStep::DefineDomain));
    assert_eq!(fixture.placement().0, Some(host("compute-1")));

    // Devices from the first attempt are still present
    let second = recovery.run(&request()).await;
    assert!(second.is_success(), "{:?}", second.failures);
    assert_eq!(fixture.placement().0, Some(host("compute-2")));
    assert_eq!(*host_runner.defines.lock().unwrap(), 2);
}
