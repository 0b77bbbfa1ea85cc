//! Smoke suite reports written to the volume.

mod support;

use std::sync::Arc;

use gpuboot::application::smoke::SmokeSuite;
use gpuboot::domain::environment::RuntimeEnvironment;
use gpuboot::domain::gpu::{ArchitectureClass, GpuProfile};
use gpuboot::domain::smoke::{SmokeCheck, SmokeStatus};
use gpuboot::testkit::fakes::FakeProbes;

use support::Volume;

#[test]
fn report_lands_in_smoke_dir() {
    let volume = Volume::new();
    let env = RuntimeEnvironment::new(volume.env_path(ArchitectureClass::Hopper), ArchitectureClass::Hopper);
    let profile = GpuProfile::classify(Some("9.0"));
    let probes = Arc::new(FakeProbes::passing().smoke_status(SmokeCheck::ALL[1], SmokeStatus::Skip));

    let (report, path) = tokio_test::block_on(SmokeSuite::new(probes).run(
        &env,
        &profile,
        &volume.config.smoke_dir(),
    ))
    .unwrap();

    assert_eq!(report.tests.len(), SmokeCheck::ALL.len());
    assert_eq!(report.failed(), 0);
    assert_eq!(report.skipped(), 1);
    assert!(path.starts_with(volume.config.smoke_dir()));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("smoke_test_hopper_"), "{name}");

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["architecture"], "hopper");
    assert_eq!(written["tests"].as_array().unwrap().len(), SmokeCheck::ALL.len());
}

#[test]
fn failed_check_is_reported_but_suite_finishes() {
    let volume = Volume::new();
    let env = RuntimeEnvironment::new(volume.env_path(ArchitectureClass::Ada), ArchitectureClass::Ada);
    let profile = GpuProfile::classify(Some("8.9"));
    let probes = Arc::new(FakeProbes::passing().smoke_status(SmokeCheck::ALL[0], SmokeStatus::Fail));

    let (report, _) = tokio_test::block_on(SmokeSuite::new(probes).run(
        &env,
        &profile,
        &volume.config.smoke_dir(),
    ))
    .unwrap();

    assert_eq!(report.failed(), 1);
    assert_eq!(report.passed(), SmokeCheck::ALL.len() - 1);
}
