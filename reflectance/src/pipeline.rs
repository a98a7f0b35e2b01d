use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::{
    args::{Job, Task},
    hdr,
    kernels::{CpuKernels, GpuContext, GpuKernels, KernelError, Kernels},
};

pub const LUT_SIZE: u32 = 200;
pub const ROUGHNESS_STEPS: u32 = 10;

pub fn irradiance_name(prefix: &str) -> PathBuf {
    format!("{}_diffuse.exr", prefix).into()
}

pub fn reflectance_name(prefix: &str, step: f32, i: u32) -> PathBuf {
    format!("{}_refl_{:.3}_{}.exr", prefix, step, i).into()
}

pub fn lut_name(prefix: &str) -> PathBuf {
    format!("{}.exr", prefix).into()
}

/// (index, step, roughness) for each map of the series, roughest last.
pub fn roughness_series() -> impl Iterator<Item = (u32, f32, f32)> {
    let step = 1.0 / ROUGHNESS_STEPS as f32;
    (1..=ROUGHNESS_STEPS).map(move |i| (i, step, step * i as f32))
}

/// Picks a backend for the job and runs it. Without an adapter we end up on the cpu anyway.
pub fn run(job: &Job) -> anyhow::Result<Vec<PathBuf>> {
    if job.cpu {
        return execute(job, &CpuKernels::new(job.config));
    }
    match GpuContext::create() {
        Ok(ctx) => {
            let kernels = GpuKernels::create(ctx, job.config, job.kernels.clone())
                .context("couldn't build the gpu kernels")?;
            execute(job, &kernels)
        }
        Err(KernelError::NoAdapter) => {
            log::warn!("no graphics adapter, running the kernels on the cpu");
            execute(job, &CpuKernels::new(job.config))
        }
        Err(e) => Err(e).context("couldn't set up the gpu"),
    }
}

/// Runs every step of the job in order, writing each output before starting the next.
/// Returns the files written.
pub fn execute(job: &Job, kernels: &dyn Kernels) -> anyhow::Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    match &job.task {
        Task::BrdfLut => {
            log::info!("generating Fresnel/Roughness/cos_v data");
            let lut = kernels
                .generate_brdf_lut(LUT_SIZE, LUT_SIZE)
                .context("brdf lut kernel failed")?;
            let path = lut_name(&job.prefix);
            log::info!("writing to: {}", path.display());
            hdr::write_rg(&path, &lut).with_context(|| write_failed(&path))?;
            written.push(path);
        }
        Task::Environment {
            input,
            reflectance,
            irradiance,
        } => {
            let env = hdr::read_rgba(input)
                .with_context(|| format!("couldn't load {}", input.display()))?;

            if *reflectance {
                for (i, step, roughness) in roughness_series() {
                    log::info!("Mapping reflectance map... (roughness {:.3})", roughness);
                    let map = kernels.map_reflectance(&env, roughness).with_context(|| {
                        format!("reflectance kernel failed at roughness {}", roughness)
                    })?;
                    let path = reflectance_name(&job.prefix, step, i);
                    log::info!("writing to: {}", path.display());
                    hdr::write_rgb(&path, &map).with_context(|| write_failed(&path))?;
                    written.push(path);
                }
            }

            if *irradiance {
                log::info!("Irradiating image...");
                let map = kernels.irradiate(&env).context("irradiance kernel failed")?;
                let path = irradiance_name(&job.prefix);
                log::info!("writing to: {}", path.display());
                hdr::write_rgb(&path, &map).with_context(|| write_failed(&path))?;
                written.push(path);
            }
        }
    }
    Ok(written)
}

fn write_failed(path: &Path) -> String {
    format!("couldn't write {}", path.display())
}
