use std::{path::PathBuf, sync::mpsc};

use bytemuck::{Pod, Zeroable};
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    Backends, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, BufferAsyncError, BufferBindingType, BufferDescriptor,
    BufferUsages, CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, Device, DeviceDescriptor, ErrorFilter, Features, Instance,
    InstanceDescriptor, Limits, Maintain, MapMode, PipelineLayoutDescriptor, PowerPreference,
    Queue, RequestAdapterOptions, ShaderStages,
};

use super::{KernelConfig, KernelError, Kernels};
use crate::{
    buffer::{PixelBuffer, Rg, Rgb, Rgba},
    shaders::{self, ProgramOptions, ShaderInput, ShaderStage},
};

const KERNELS_SRC: &str = include_str!("../../shaders/kernels.comp");

// workgroup size is 16x16x1
const WORKGROUP: u32 = 16;

// matches the std140 Params block in kernels.comp
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Params {
    width: u32,
    height: u32,
    env_width: u32,
    env_height: u32,
    roughness: f32,
    samples: u32,
    phi_steps: u32,
    theta_steps: u32,
}

/// Owns the device everything else compiles and dispatches against.
pub struct GpuContext {
    _instance: Instance,
    device: Device,
    queue: Queue,
}

impl GpuContext {
    pub fn create() -> Result<Self, KernelError> {
        let instance = Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });
        let adapter = futures::executor::block_on(async {
            instance
                .request_adapter(&RequestAdapterOptions {
                    power_preference: PowerPreference::HighPerformance,
                    force_fallback_adapter: false,
                    compatible_surface: None,
                })
                .await
        })
        .ok_or(KernelError::NoAdapter)?;
        log::info!("Chose the adapter: {:?}", adapter.get_info());
        let supported = adapter.limits();
        let (device, queue) = futures::executor::block_on(async {
            adapter
                .request_device(
                    &DeviceDescriptor {
                        label: None,
                        features: Features::empty(),
                        limits: Limits {
                            // environment maps easily blow past the 128MiB default
                            max_storage_buffer_binding_size: supported
                                .max_storage_buffer_binding_size,
                            max_buffer_size: supported.max_buffer_size,
                            ..Default::default()
                        },
                    },
                    None,
                )
                .await
        })?;
        Ok(Self {
            _instance: instance,
            device,
            queue,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

pub struct GpuKernels {
    ctx: GpuContext,
    config: KernelConfig,
    bgl: BindGroupLayout,
    irradiance: ComputePipeline,
    reflectance: ComputePipeline,
    brdf_lut: ComputePipeline,
}

fn kernel_input(source: Option<PathBuf>) -> ShaderInput {
    match source {
        Some(path) => ShaderInput::File(path),
        None => ShaderInput::Embedded {
            name: "kernels.comp",
            source: KERNELS_SRC,
        },
    }
}

fn kernel_options(flag: &str) -> ProgramOptions {
    ProgramOptions {
        defines: vec![flag.to_string()],
        ..Default::default()
    }
}

fn storage_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::COMPUTE,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuKernels {
    /// Builds one pipeline per kernel. `source` replaces the built-in kernels.comp.
    pub fn create(
        ctx: GpuContext,
        config: KernelConfig,
        source: Option<PathBuf>,
    ) -> Result<Self, KernelError> {
        let device = ctx.device();
        let input = kernel_input(source);

        let bgl = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: None,
            entries: &[
                storage_entry(0),
                storage_entry(1),
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = |flag: &str| -> Result<ComputePipeline, KernelError> {
            let program = shaders::compile_and_link(
                device,
                &[(input.clone(), ShaderStage::Compute)],
                &kernel_options(flag),
            )?;
            let module = program.module(ShaderStage::Compute)?;
            device.push_error_scope(ErrorFilter::Validation);
            let pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(flag),
                layout: Some(&pipeline_layout),
                module,
                entry_point: "main",
            });
            if let Some(e) = futures::executor::block_on(device.pop_error_scope()) {
                return Err(KernelError::Validation(e.to_string()));
            }
            // the program and its modules drop here, the pipeline holds what it needs
            Ok(pipeline)
        };
        let irradiance = pipeline("IRRADIANCE")?;
        let reflectance = pipeline("REFLECTANCE")?;
        let brdf_lut = pipeline("BRDF_LUT")?;

        Ok(Self {
            ctx,
            config,
            bgl,
            irradiance,
            reflectance,
            brdf_lut,
        })
    }

    fn params(&self, width: u32, height: u32) -> Params {
        Params {
            width,
            height,
            env_width: 0,
            env_height: 0,
            roughness: 0.0,
            samples: self.config.samples,
            phi_steps: self.config.phi_steps,
            theta_steps: self.config.theta_steps,
        }
    }

    /// Runs one kernel over a width x height grid and reads back `channels`
    /// floats per pixel.
    fn dispatch(
        &self,
        pipeline: &ComputePipeline,
        params: Params,
        env: Option<&PixelBuffer<Rgba>>,
        channels: u64,
    ) -> Result<Vec<f32>, KernelError> {
        let device = &self.ctx.device;
        let size = params.width as u64 * params.height as u64 * channels * 4;
        if size == 0 {
            return Ok(vec![]);
        }
        let env_bytes: &[u8] = match env {
            Some(env) => bytemuck::cast_slice(env.pixels()),
            // the lut kernel never reads it but the binding has to exist
            None => &[0; 16],
        };
        let limit = device.limits().max_storage_buffer_binding_size as u64;
        for bytes in [size, env_bytes.len() as u64] {
            if bytes > limit {
                return Err(KernelError::TooLarge { bytes, limit });
            }
        }

        device.push_error_scope(ErrorFilter::Validation);
        let env_buf = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("environment"),
            contents: env_bytes,
            usage: BufferUsages::STORAGE,
        });
        let target = device.create_buffer(&BufferDescriptor {
            label: Some("target"),
            size,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params_buf = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("params"),
            contents: bytemuck::bytes_of(&params),
            usage: BufferUsages::UNIFORM,
        });
        let out_buf = device.create_buffer(&BufferDescriptor {
            label: None,
            size,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let bg = device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: &self.bgl,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: env_buf.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: target.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder =
            device.create_command_encoder(&CommandEncoderDescriptor { label: None });
        {
            let mut cpass = encoder.begin_compute_pass(&ComputePassDescriptor { label: None });
            cpass.set_pipeline(pipeline);
            cpass.set_bind_group(0, &bg, &[]);
            // TODO: split big environments into row bands so a single dispatch
            // stays under the driver watchdog on windows
            cpass.dispatch_workgroups(
                (params.width + WORKGROUP - 1) / WORKGROUP,
                (params.height + WORKGROUP - 1) / WORKGROUP,
                1,
            );
        }
        encoder.copy_buffer_to_buffer(&target, 0, &out_buf, 0, size);
        self.ctx.queue.submit(Some(encoder.finish()));
        if let Some(e) = futures::executor::block_on(device.pop_error_scope()) {
            return Err(KernelError::Validation(e.to_string()));
        }

        let bf = out_buf.slice(..);
        let (tx, rx) = mpsc::channel();
        bf.map_async(MapMode::Read, move |e| {
            let _ = tx.send(e);
        });
        device.poll(Maintain::Wait);
        // the callback has fired once the wait returns
        rx.recv().unwrap_or(Err(BufferAsyncError))?;
        let contents = bf.get_mapped_range();
        let values = bytemuck::cast_slice::<u8, f32>(&contents).to_vec();
        drop(contents);
        out_buf.unmap();
        Ok(values)
    }

    fn environment_params(&self, env: &PixelBuffer<Rgba>, roughness: f32) -> Params {
        Params {
            env_width: env.width(),
            env_height: env.height(),
            roughness,
            ..self.params(env.width(), env.height())
        }
    }
}

fn into_rgb(width: u32, height: u32, values: Vec<f32>) -> Result<PixelBuffer<Rgb>, KernelError> {
    let pixels = values
        .chunks_exact(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();
    Ok(PixelBuffer::new(width, height, pixels)?)
}

impl Kernels for GpuKernels {
    fn irradiate(&self, env: &PixelBuffer<Rgba>) -> Result<PixelBuffer<Rgb>, KernelError> {
        let params = self.environment_params(env, 0.0);
        let values = self.dispatch(&self.irradiance, params, Some(env), 3)?;
        into_rgb(env.width(), env.height(), values)
    }

    fn map_reflectance(
        &self,
        env: &PixelBuffer<Rgba>,
        roughness: f32,
    ) -> Result<PixelBuffer<Rgb>, KernelError> {
        let params = self.environment_params(env, roughness);
        let values = self.dispatch(&self.reflectance, params, Some(env), 3)?;
        into_rgb(env.width(), env.height(), values)
    }

    fn generate_brdf_lut(&self, width: u32, height: u32) -> Result<PixelBuffer<Rg>, KernelError> {
        let values = self.dispatch(&self.brdf_lut, self.params(width, height), None, 2)?;
        let pixels = values.chunks_exact(2).map(|c| [c[0], c[1]]).collect();
        Ok(PixelBuffer::new(width, height, pixels)?)
    }
}
