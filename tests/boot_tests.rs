//! End-to-end boot scenarios against fake tools.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use gpuboot::application::boot::Bootstrapper;
use gpuboot::application::install::InstallOutcome;
use gpuboot::application::secondary::SecondaryOutcome;
use gpuboot::domain::gpu::ArchitectureClass;
use gpuboot::domain::service::{ReadyState, CPU_FALLBACK_FLAG, DISABLE_SECONDARY_FLAG};
use gpuboot::error::{BootError, Error};
use gpuboot::testkit::fakes::{
    FakeHardware, FakeLauncher, FakePackageManager, FakeProbes, FakeReadiness, Script,
};
use gpuboot::testkit::FakeToolchain;

use support::{installs_of, Volume};

#[tokio::test]
async fn blackwell_host_boots_ready_on_its_own_environment() {
    let volume = Volume::new();
    let fakes = FakeToolchain::healthy(Some("12.0"));

    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");
    let report = &booted.report;

    assert_eq!(report.architecture, ArchitectureClass::Blackwell);
    assert_eq!(report.environment, volume.env_path(ArchitectureClass::Blackwell));
    assert_eq!(report.install, InstallOutcome::Installed);
    assert!(matches!(report.secondary, SecondaryOutcome::Ready { .. }));
    assert_eq!(report.service.ready_state, ReadyState::Ready);
    assert!(!report.service.argv.iter().any(|a| a == CPU_FALLBACK_FLAG));
    assert!(!report.service.argv.iter().any(|a| a == DISABLE_SECONDARY_FLAG));

    let pin = volume.config.runtime.pin_for(ArchitectureClass::Blackwell);
    assert_eq!(
        report.installed_versions.get(&volume.config.runtime.package),
        Some(&pin.full_version())
    );
    assert_eq!(
        std::fs::read_link(volume.config.legacy_alias()).unwrap(),
        volume.env_path(ArchitectureClass::Blackwell)
    );

    let exit = booted.service.shutdown().await.unwrap();
    assert!(exit.stopped);
    assert!(exit.success());
}

#[tokio::test]
async fn missing_hardware_query_falls_back_to_cpu() {
    let volume = Volume::new();
    let mut fakes = FakeToolchain::healthy(None);
    fakes.hardware = Arc::new(FakeHardware::failing());

    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");

    assert_eq!(booted.report.architecture, ArchitectureClass::CpuOnly);
    assert!(booted.report.service.argv.iter().any(|a| a == CPU_FALLBACK_FLAG));
    assert!(volume.interpreter(ArchitectureClass::CpuOnly).exists());
    booted.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn unusable_device_adds_cpu_flag_on_accelerated_class() {
    let volume = Volume::new();
    let mut fakes = FakeToolchain::healthy(Some("8.9"));
    fakes.probes = Arc::new(FakeProbes::passing().no_device());

    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");

    assert_eq!(booted.report.architecture, ArchitectureClass::Ada);
    assert!(booted.report.service.argv.iter().any(|a| a == CPU_FALLBACK_FLAG));
    booted.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn required_gpu_missing_is_fatal() {
    let mut volume = Volume::new();
    volume.config.require_gpu = true;
    let fakes = FakeToolchain::healthy(None);

    let err = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Boot(BootError::GpuRequired)));
    assert!(err.is_fatal_precondition());
    assert_eq!(fakes.packages.environments_created(), 0);
    assert_eq!(fakes.launcher.spawn_count(), 0);
}

#[tokio::test]
async fn missing_volume_aborts_before_any_work() {
    let volume = Volume::new();
    let config = gpuboot::testkit::config::config_for(&volume.path().join("not-mounted"));
    let fakes = FakeToolchain::healthy(Some("8.6"));

    let err = Bootstrapper::new(&config, fakes.toolchain()).boot().await.unwrap_err();

    assert!(matches!(err, Error::Boot(BootError::VolumeUnavailable { .. })));
    assert_eq!(fakes.packages.environments_created(), 0);
}

#[tokio::test]
async fn second_boot_skips_install() {
    let volume = Volume::new();
    let fakes = FakeToolchain::healthy(Some("9.0"));

    let first = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("first boot");
    assert_eq!(first.report.install, InstallOutcome::Installed);
    first.service.shutdown().await.unwrap();
    let installs_after_first = fakes.packages.install_calls().len();

    let second = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("second boot");

    assert_eq!(second.report.architecture, ArchitectureClass::Hopper);
    assert_eq!(second.report.install, InstallOutcome::AlreadyInstalled);
    assert_eq!(fakes.packages.install_calls().len(), installs_after_first);
    assert_eq!(fakes.packages.environments_created(), 1);
    second.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn class_change_repoints_alias_and_keeps_old_environment() {
    let volume = Volume::new();

    let ampere = FakeToolchain::healthy(Some("8.6"));
    let booted = Bootstrapper::new(&volume.config, ampere.toolchain())
        .boot()
        .await
        .expect("ampere boot");
    booted.service.shutdown().await.unwrap();

    let hopper = FakeToolchain::healthy(Some("9.0"));
    let booted = Bootstrapper::new(&volume.config, hopper.toolchain())
        .boot()
        .await
        .expect("hopper boot");
    booted.service.shutdown().await.unwrap();

    assert_eq!(
        std::fs::read_link(volume.config.legacy_alias()).unwrap(),
        volume.env_path(ArchitectureClass::Hopper)
    );
    assert!(volume.interpreter(ArchitectureClass::Ampere).exists());
}

#[tokio::test]
async fn fresh_lock_blocks_install_until_released() {
    let volume = Volume::new();
    volume.seed_environment(ArchitectureClass::Blackwell);
    let lock = volume.hold_lock(ArchitectureClass::Blackwell);
    let fakes = FakeToolchain::healthy(Some("12.0"));

    let release = tokio::spawn({
        let lock = lock.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(600)).await;
            std::fs::remove_file(lock).unwrap();
        }
    });

    let started = Instant::now();
    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");
    release.await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(booted.report.install, InstallOutcome::Installed);
    let runtime = &volume.config.runtime.package;
    assert_eq!(installs_of(&fakes.packages.install_calls(), runtime).len(), 1);
    assert!(!lock.exists());
    booted.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn lock_never_released_is_evicted_after_timeout() {
    let volume = Volume::new();
    volume.seed_environment(ArchitectureClass::Ampere);
    let lock = volume.hold_lock(ArchitectureClass::Ampere);
    let fakes = FakeToolchain::healthy(Some("8.6"));

    let started = Instant::now();
    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");

    assert!(started.elapsed() >= volume.config.runtime.lock_timeout());
    assert_eq!(booted.report.install, InstallOutcome::Installed);
    let runtime = &volume.config.runtime.package;
    assert_eq!(installs_of(&fakes.packages.install_calls(), runtime).len(), 1);
    assert!(!lock.exists());
    booted.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn sibling_install_while_waiting_is_reused() {
    let volume = Volume::new();
    volume.seed_environment(ArchitectureClass::Hopper);
    let lock = volume.hold_lock(ArchitectureClass::Hopper);
    let fakes = FakeToolchain::healthy(Some("9.0"));
    let pin = volume.config.runtime.pin_for(ArchitectureClass::Hopper);

    let sibling = tokio::spawn({
        let packages = fakes.packages.clone();
        let interpreter = volume.interpreter(ArchitectureClass::Hopper);
        let package = volume.config.runtime.package.clone();
        let version = pin.full_version();
        async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            packages.set_installed(&interpreter, &package, &version);
            std::fs::remove_file(lock).unwrap();
        }
    });

    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");
    sibling.await.unwrap();

    assert_eq!(booted.report.install, InstallOutcome::InstalledBySibling);
    let runtime = &volume.config.runtime.package;
    assert!(installs_of(&fakes.packages.install_calls(), runtime).is_empty());
    booted.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn environment_creation_waits_for_sibling_holding_lock() {
    let volume = Volume::new();
    let lock = volume.hold_lock(ArchitectureClass::Ada);
    let fakes = FakeToolchain::healthy(Some("8.9"));

    let sibling = tokio::spawn({
        let lock = lock.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            std::fs::remove_file(lock).unwrap();
        }
    });

    let started = Instant::now();
    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");
    sibling.await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(fakes.packages.environments_created(), 1);
    assert!(!lock.exists());
    booted.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_primary_restore_after_secondary_aborts_boot() {
    let volume = Volume::new();
    let mut fakes = FakeToolchain::healthy(Some("8.9"));
    let runtime = &volume.config.runtime.package;
    fakes.packages = Arc::new(
        FakePackageManager::new()
            .bump_on_install(&volume.config.secondary.package, runtime, "2.6.0+cu126")
            .fail_install_of(runtime),
    );
    let pin = volume.config.runtime.pin_for(ArchitectureClass::Ada);
    fakes
        .packages
        .set_installed(&volume.interpreter(ArchitectureClass::Ada), runtime, &pin.full_version());

    let err = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::Boot(BootError::RuntimeInstall { ref package, .. }) if package == runtime),
        "{err}"
    );
    assert_eq!(fakes.launcher.spawn_count(), 0);
}

#[tokio::test]
async fn broken_secondary_module_is_removed_and_flagged() {
    let volume = Volume::new();
    let mut fakes = FakeToolchain::healthy(Some("8.9"));
    fakes.probes = Arc::new(FakeProbes::passing().fail_secondary());

    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");

    assert!(matches!(booted.report.secondary, SecondaryOutcome::Unavailable { .. }));
    assert!(booted.report.service.argv.iter().any(|a| a == DISABLE_SECONDARY_FLAG));
    let secondary = volume.config.secondary.package.clone();
    assert!(fakes
        .packages
        .uninstall_calls()
        .iter()
        .any(|removed| removed == &vec![secondary.clone()]));
    assert!(!booted.report.installed_versions.contains_key(&secondary));
    booted.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_runtime_install_is_fatal() {
    let volume = Volume::new();
    let runtime = volume.config.runtime.package.clone();
    let mut fakes = FakeToolchain::healthy(Some("8.6"));
    fakes.packages = Arc::new(gpuboot::testkit::fakes::FakePackageManager::new().fail_install_of(&runtime));

    let err = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Boot(BootError::RuntimeInstall { .. })));
    assert_eq!(fakes.launcher.spawn_count(), 0);
    assert!(!support::installs_of(&fakes.packages.install_calls(), &runtime).is_empty());
}

#[tokio::test]
async fn unanswered_readiness_leaves_service_degraded_but_running() {
    let volume = Volume::new();
    let mut fakes = FakeToolchain::healthy(Some("8.6"));
    fakes.readiness = Arc::new(FakeReadiness::never());

    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");

    assert_eq!(booted.report.service.ready_state, ReadyState::Degraded);
    assert_eq!(fakes.readiness.attempts(), volume.config.service.health_attempts);
    assert_eq!(fakes.launcher.kills(), 0);
    booted.service.shutdown().await.unwrap();
    assert_eq!(fakes.launcher.kills(), 1);
}

#[tokio::test]
async fn missing_module_restarts_are_bounded() {
    let mut volume = Volume::new();
    volume.config.service.max_restarts = 2;
    volume.config.service.auto_install_allowlist = vec!["alpha".into(), "beta".into(), "gamma".into()];
    let mut fakes = FakeToolchain::healthy(Some("8.6"));
    fakes.launcher = Arc::new(FakeLauncher::new([
        Script::exits(1).line("ModuleNotFoundError: No module named 'alpha'"),
        Script::exits(1).line("ModuleNotFoundError: No module named 'beta'"),
        Script::exits(1).line("ModuleNotFoundError: No module named 'gamma'"),
    ]));

    let mut booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");
    let exit = tokio::time::timeout(Duration::from_secs(10), booted.service.wait())
        .await
        .expect("service ends")
        .unwrap();

    assert_eq!(exit.restarts, 2);
    assert_eq!(exit.code, Some(1));
    assert!(!exit.success());
    assert_eq!(fakes.launcher.spawn_count(), 3);
    let installed: Vec<_> = ["alpha", "beta", "gamma"]
        .into_iter()
        .filter(|m| !installs_of(&fakes.packages.install_calls(), m).is_empty())
        .collect();
    assert_eq!(installed, vec!["alpha", "beta"]);
}

#[tokio::test]
async fn console_runs_beside_the_service_when_enabled() {
    let mut volume = Volume::new();
    volume.config.console.enabled = true;
    let fakes = FakeToolchain::healthy(Some("8.6"));

    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");

    let console = booted.console.expect("console started");
    let specs = fakes.launcher.specs();
    assert_eq!(specs.len(), 2);
    assert!(specs[1].program.ends_with("bin/jupyter"));
    assert!(specs[1].has_arg("--no-browser"));
    console.shutdown().await.unwrap();
    booted.service.shutdown().await.unwrap();
}
