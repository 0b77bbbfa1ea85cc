//! Extension and asset provisioning against fake fetchers.

mod support;

use std::sync::Arc;

use gpuboot::application::boot::Bootstrapper;
use gpuboot::domain::asset::AssetStatus;
use gpuboot::testkit::fakes::{FakeDownloader, FakeSourceControl};
use gpuboot::testkit::FakeToolchain;

use support::Volume;

const ASSETS: &str = r#"{
    "checkpoints": [
        "https://models.example.com/sd_xl_base_1.0.safetensors",
        "https://models.example.com/sd_xl_refiner_1.0.safetensors?download=true"
    ],
    "vae": ["https://models.example.com/vae/sdxl_vae.safetensors"]
}"#;

#[tokio::test]
async fn second_run_downloads_nothing() {
    let volume = Volume::new();
    volume.write_assets(ASSETS);
    let fakes = FakeToolchain::healthy(None);
    let boot = Bootstrapper::new(&volume.config, fakes.toolchain());

    let first = boot.provision(None).await;
    assert!(first.complete());
    assert_eq!(first.assets.completed(), 3);
    assert!(volume
        .config
        .assets_dir()
        .join("checkpoints/sd_xl_refiner_1.0.safetensors")
        .is_file());

    let second = boot.provision(None).await;
    assert!(second.complete());
    assert_eq!(second.assets.skipped(), 3);
    assert_eq!(second.assets.completed(), 0);
    assert_eq!(fakes.downloader.downloads().len(), 3);
}

#[tokio::test]
async fn one_failed_download_does_not_stop_the_rest() {
    let volume = Volume::new();
    volume.write_assets(ASSETS);
    let mut fakes = FakeToolchain::healthy(None);
    fakes.downloader = Arc::new(
        FakeDownloader::new().fail_url("https://models.example.com/vae/sdxl_vae.safetensors"),
    );

    let report = Bootstrapper::new(&volume.config, fakes.toolchain())
        .provision(None)
        .await;

    assert!(report.assets.complete);
    assert_eq!(report.assets.completed(), 2);
    assert_eq!(report.assets.failed(), 1);
    assert!(!volume.config.assets_dir().join("vae/sdxl_vae.safetensors").exists());
}

#[tokio::test]
async fn extensions_fall_back_across_candidates() {
    let volume = Volume::new();
    volume.write_extensions(
        r#"{
            "ComfyUI-Manager": "https://git.example.com/manager.git",
            "ComfyUI-Impact-Pack": [
                "https://git.example.com/impact-moved.git",
                "https://mirror.example.com/impact.git"
            ],
            "ComfyUI-Gone": "https://git.example.com/gone.git"
        }"#,
    );
    let mut fakes = FakeToolchain::healthy(None);
    fakes.source_control = Arc::new(
        FakeSourceControl::new()
            .fail_url("https://git.example.com/impact-moved.git")
            .fail_url("https://git.example.com/gone.git")
            .with_file("requirements.txt", "numpy\n"),
    );
    let interpreter = volume.path().join("envs/ampere/bin/python");

    let report = Bootstrapper::new(&volume.config, fakes.toolchain())
        .provision(Some(interpreter))
        .await;

    let status_of = |name: &str| {
        report
            .extensions
            .items
            .iter()
            .find(|item| item.label == name)
            .map(|item| item.status.clone())
            .unwrap()
    };
    assert_eq!(
        status_of("ComfyUI-Impact-Pack"),
        AssetStatus::Completed {
            source: "https://mirror.example.com/impact.git".into()
        }
    );
    assert!(matches!(status_of("ComfyUI-Manager"), AssetStatus::Completed { .. }));
    assert!(matches!(status_of("ComfyUI-Gone"), AssetStatus::Failed { .. }));
    assert_eq!(fakes.packages.requirement_files().len(), 2);
    assert!(volume.config.extensions_dir().join("ComfyUI-Manager").is_dir());
}

#[tokio::test]
async fn existing_extension_is_not_cloned_again() {
    let volume = Volume::new();
    volume.write_extensions(r#"{"ComfyUI-Manager": "https://git.example.com/manager.git"}"#);
    std::fs::create_dir_all(volume.config.extensions_dir().join("ComfyUI-Manager")).unwrap();
    let fakes = FakeToolchain::healthy(None);

    let report = Bootstrapper::new(&volume.config, fakes.toolchain())
        .provision(None)
        .await;

    assert_eq!(report.extensions.skipped(), 1);
    assert!(fakes.source_control.clones().is_empty());
}

#[tokio::test]
async fn panicking_extension_task_leaves_assets_intact() {
    let volume = Volume::new();
    volume.write_extensions(r#"{"Explodes": "https://git.example.com/explodes.git"}"#);
    volume.write_assets(ASSETS);
    let mut fakes = FakeToolchain::healthy(None);
    fakes.source_control =
        Arc::new(FakeSourceControl::new().panic_on("https://git.example.com/explodes.git"));

    let report = Bootstrapper::new(&volume.config, fakes.toolchain())
        .provision(None)
        .await;

    assert!(!report.extensions.complete);
    assert!(report.assets.complete);
    assert_eq!(report.assets.completed(), 3);
}

#[tokio::test]
async fn missing_manifests_mean_nothing_to_do() {
    let volume = Volume::new();
    let fakes = FakeToolchain::healthy(None);

    let report = Bootstrapper::new(&volume.config, fakes.toolchain())
        .provision(None)
        .await;

    assert!(report.complete());
    assert!(report.extensions.items.is_empty());
    assert!(report.assets.items.is_empty());
}

#[tokio::test]
async fn boot_without_provisioning_fetches_nothing() {
    let mut volume = Volume::new();
    volume.write_assets(ASSETS);
    volume.config.provisioning.enabled = false;
    let fakes = FakeToolchain::healthy(Some("8.6"));

    let booted = Bootstrapper::new(&volume.config, fakes.toolchain())
        .boot()
        .await
        .expect("boot");

    assert!(booted.report.provision.is_none());
    assert!(fakes.downloader.downloads().is_empty());
    booted.service.shutdown().await.unwrap();
}
