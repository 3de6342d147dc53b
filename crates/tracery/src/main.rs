//! # Tracery Demo
//!
//! Drives the instanced ray-tracing pipeline on the headless backend.
//!
//! ```bash
//! # Spiral lattice with GPU-resolved counts
//! RUST_LOG=tracery=info,tracery_rendering=debug tracery tracery.toml
//!
//! # Ten animated spheres with CPU transforms
//! tracery --direct
//! ```

use std::process::ExitCode;

use tracery_core::{
    generate_dims, sphere_row, InstanceConfig, MaterialClass, MaterialId, MeshDesc, MeshId,
    PipelineConfig, PropertyId, SceneRenderer, Vec3,
};
use tracery_rendering::{
    AccelerationStructureManager, FrameOrchestrator, HeadlessDevice, IndirectDrawSubmitter,
    KernelId, KernelPositionPass, RenderResult, TraceOutcome, TraceView,
};
use tracing_subscriber::EnvFilter;

/// Index count of the demo sphere mesh.
const SPHERE_INDEX_COUNT: u32 = 2880;
/// Spheres in the direct-mode row.
const ROW_LENGTH: u32 = 10;
/// CPU stand-in for the lattice animation kernel.
const DRIFT_KERNEL: KernelId = KernelId("drift");
/// Upward drift per frame, in world units.
const DRIFT_STEP: f32 = 0.01;

struct Args {
    config_path: Option<String>,
    direct: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        config_path: None,
        direct: false,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--direct" => args.direct = true,
            _ => args.config_path = Some(arg),
        }
    }
    args
}

fn load_config(path: Option<&str>) -> Result<PipelineConfig, String> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let config = PipelineConfig::from_toml_file(path).map_err(|err| err.to_string())?;
    tracing::info!("loaded config from {}", path);
    Ok(config)
}

fn demo_scene() -> Vec<SceneRenderer> {
    let classes = [
        MaterialClass::Opaque,
        MaterialClass::AlphaTested,
        MaterialClass::Transparent,
    ];
    (0u32..12)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::TAU / 12.0;
            let position = Vec3::new(angle.cos() * 3.0, 0.5, angle.sin() * 3.0);
            SceneRenderer::new(i, position, classes[i as usize % classes.len()])
        })
        .collect()
}

fn sphere_config() -> InstanceConfig {
    InstanceConfig::new(MeshDesc::new(MeshId(1), SPHERE_INDEX_COUNT), MaterialId(1))
}

/// Raises every lattice instance by `DRIFT_STEP` (matrix float 13 is y).
fn register_drift(device: &mut HeadlessDevice) {
    device.register_kernel(DRIFT_KERNEL, |args| {
        let count = args.int(PropertyId::count()).unwrap_or(0) as usize;
        let Some(matrices) = args.buffer(PropertyId::rtx_matrices()) else {
            return;
        };
        for index in 0..count {
            let offset = index * 64 + 13 * 4;
            let Some(bits) = matrices.read_u32(offset) else {
                return;
            };
            if !matrices.write_u32(offset, (f32::from_bits(bits) + DRIFT_STEP).to_bits()) {
                return;
            }
        }
    });
}

fn run_indirect(device: &mut HeadlessDevice, config: &PipelineConfig) -> RenderResult<()> {
    let transforms = generate_dims(config.lattice);
    let mut frames = FrameOrchestrator::new(device, config, sphere_config(), &transforms)?;
    frames.install_position_pass(Box::new(KernelPositionPass::new(DRIFT_KERNEL)));

    let result = drive_lattice(device, &mut frames, config);
    frames.shutdown(device);
    result
}

fn drive_lattice(
    device: &mut HeadlessDevice,
    frames: &mut FrameOrchestrator<HeadlessDevice>,
    config: &PipelineConfig,
) -> RenderResult<()> {
    let scene = demo_scene();
    let mut view = TraceView::new("main");

    for _ in 0..config.frame.frames {
        let report = frames.tick(device, &scene, &mut view)?;
        device.take_draws();
        device.take_dispatches();
        if let TraceOutcome::Skipped(err) = &report.trace {
            tracing::warn!("frame {} traced nothing: {}", report.frame_number, err);
        }
    }

    let stats = frames.stats();
    tracing::info!(
        "{} frames: {} traced, {} paused, {} skipped; {} instances in the last build, worst frame {} us",
        stats.frames,
        stats.traced_frames,
        stats.paused_frames,
        stats.skipped_frames,
        stats.instances_traced,
        stats.worst_frame_time_us
    );
    Ok(())
}

fn run_direct(device: &mut HeadlessDevice, config: &PipelineConfig) -> RenderResult<()> {
    let mut accel = AccelerationStructureManager::new(device)?;
    let result = drive_row(device, &mut accel, config);
    accel.release(device);
    result
}

fn drive_row(
    device: &mut HeadlessDevice,
    accel: &mut AccelerationStructureManager<HeadlessDevice>,
    config: &PipelineConfig,
) -> RenderResult<()> {
    let mut submitter = IndirectDrawSubmitter::new();
    let instance = sphere_config();
    let params = config.draw.with_material(MaterialId(1));
    let mesh = MeshDesc::new(MeshId(1), SPHERE_INDEX_COUNT);
    let scene = demo_scene();
    let mut view = TraceView::new("main");

    let mut time = 0.0f32;
    for frame in 0..config.frame.frames {
        time += config.frame.delta_time;
        let row = sphere_row(ROW_LENGTH, time);
        submitter.reset();
        submitter.submit_instanced(device, &params, &mesh, &row)?;
        device.take_draws();

        if config.frame.paused {
            continue;
        }
        accel.clear()?;
        accel.cull(&config.culling, &scene)?;
        accel.add_instances(&instance, &row)?;
        match accel.build(device, config.frame.origin) {
            Ok(report) => {
                accel.bind(&mut view)?;
                tracing::debug!("frame {}: {} instances bound", frame, report.instance_count());
            }
            Err(err) => {
                tracing::warn!("frame {}: ray tracing skipped: {}", frame, err);
                view.unbind();
            }
        }
    }

    tracing::info!(
        "direct mode finished: generation {}, binding {:?}",
        accel.generation(),
        view.binding()
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args();
    let config = match load_config(args.config_path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("config error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut device = HeadlessDevice::new();
    let result = if args.direct {
        run_direct(&mut device, &config)
    } else {
        register_drift(&mut device);
        run_indirect(&mut device, &config)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("pipeline aborted: {}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracery_core::{FrameSettings, LatticeDims};

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            lattice: LatticeDims::new(2, 2, 2),
            frame: FrameSettings {
                frames: 3,
                ..FrameSettings::default()
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_indirect_run_releases_everything() {
        let mut device = HeadlessDevice::new();
        register_drift(&mut device);
        run_indirect(&mut device, &small_config()).unwrap();
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_structure_count(), 0);
    }

    #[test]
    fn test_failed_frame_still_releases() {
        // Drift kernel never registered: the first tick fails.
        let mut device = HeadlessDevice::new();
        let err = run_indirect(&mut device, &small_config()).unwrap_err();
        assert!(matches!(
            err,
            tracery_rendering::RenderError::UnknownHandle { kind: "kernel", .. }
        ));
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.allocated_bytes(), 0);
        assert_eq!(device.live_structure_count(), 0);
    }

    #[test]
    fn test_direct_run_releases_structure() {
        let mut device = HeadlessDevice::new();
        run_direct(&mut device, &small_config()).unwrap();
        assert_eq!(device.live_structure_count(), 0);
    }
}
