use crate::{
    buffer::{BufferError, PixelBuffer, Rg, Rgb, Rgba},
    shaders::ShaderError,
};

mod cpu;
mod gpu;

pub use cpu::CpuKernels;
pub use gpu::{GpuContext, GpuKernels};

/// Sampling density shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelConfig {
    // midpoint grid over the sphere for the diffuse convolution
    pub phi_steps: u32,
    pub theta_steps: u32,
    // hammersley points per pixel for reflectance and the lut
    pub samples: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            phi_steps: 128,
            theta_steps: 64,
            samples: 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("no suitable graphics adapter found")]
    NoAdapter,
    #[error("couldn't open the device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("gpu rejected the dispatch: {0}")]
    Validation(String),
    #[error("couldn't read back results: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("{bytes} byte buffer is over the device limit of {limit}")]
    TooLarge { bytes: u64, limit: u64 },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// The three precomputations. Each call blocks until its output is complete.
pub trait Kernels {
    /// Diffuse irradiance for every direction of the environment.
    fn irradiate(&self, env: &PixelBuffer<Rgba>) -> Result<PixelBuffer<Rgb>, KernelError>;

    /// Specular prefilter of the environment at a single roughness level.
    fn map_reflectance(
        &self,
        env: &PixelBuffer<Rgba>,
        roughness: f32,
    ) -> Result<PixelBuffer<Rgb>, KernelError>;

    /// Split-sum scale (r) and bias (g), n.v along x and roughness along y.
    fn generate_brdf_lut(&self, width: u32, height: u32) -> Result<PixelBuffer<Rg>, KernelError>;
}
