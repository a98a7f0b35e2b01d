use std::f32::consts::{PI, TAU};

use nalgebra::{Vector2, Vector3};
use rayon::prelude::*;

use super::{KernelConfig, KernelError, Kernels};
use crate::buffer::{PixelBuffer, Rg, Rgb, Rgba};

// the same math as shaders/kernels.comp, one pixel per rayon task
pub struct CpuKernels {
    config: KernelConfig,
}

impl CpuKernels {
    pub fn new(config: KernelConfig) -> Self {
        log::info!("Running kernels on {} cpu threads", rayon::current_num_threads());
        Self { config }
    }
}

fn par_image<P, F>(width: u32, height: u32, f: F) -> Result<PixelBuffer<P>, KernelError>
where
    P: Copy + Send,
    F: Fn(u32, u32) -> P + Sync,
{
    let w = width as usize;
    let pixels = (0..w * height as usize)
        .into_par_iter()
        .map(|i| f((i % w) as u32, (i / w) as u32))
        .collect::<Vec<_>>();
    Ok(PixelBuffer::new(width, height, pixels)?)
}

fn texel_center(x: u32, y: u32, width: u32, height: u32) -> (f32, f32) {
    (
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    )
}

fn direction_of(u: f32, v: f32) -> Vector3<f32> {
    let phi = TAU * u;
    let theta = PI * v;
    Vector3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin())
}

fn lookup(env: &PixelBuffer<Rgba>, dir: &Vector3<f32>) -> Vector3<f32> {
    let theta = dir.y.clamp(-1.0, 1.0).acos();
    let mut phi = dir.z.atan2(dir.x);
    if phi < 0.0 {
        phi += TAU;
    }
    let x = ((phi / TAU * env.width() as f32) as u32).min(env.width().saturating_sub(1));
    let y = ((theta / PI * env.height() as f32) as u32).min(env.height().saturating_sub(1));
    // an empty environment is black
    let [r, g, b, _] = env.get(x, y).unwrap_or_default();
    Vector3::new(r, g, b)
}

fn hammersley(i: u32, n: u32) -> Vector2<f32> {
    Vector2::new(
        i as f32 / n as f32,
        i.reverse_bits() as f32 * 2.328_306_4e-10,
    )
}

fn importance_sample_ggx(xi: Vector2<f32>, n: &Vector3<f32>, roughness: f32) -> Vector3<f32> {
    let a = roughness * roughness;
    let phi = TAU * xi.x;
    let cos_theta = ((1.0 - xi.y) / (1.0 + (a * a - 1.0) * xi.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();

    let up = if n.z.abs() < 0.999 {
        Vector3::z()
    } else {
        Vector3::x()
    };
    let tangent = up.cross(n).normalize();
    let bitangent = n.cross(&tangent);
    (tangent * (phi.cos() * sin_theta) + bitangent * (phi.sin() * sin_theta) + n * cos_theta)
        .normalize()
}

fn irradiance_at(env: &PixelBuffer<Rgba>, n: &Vector3<f32>, config: &KernelConfig) -> Rgb {
    let dphi = TAU / config.phi_steps as f32;
    let dtheta = PI / config.theta_steps as f32;
    let mut sum = Vector3::<f32>::zeros();
    for j in 0..config.theta_steps {
        let v = (j as f32 + 0.5) / config.theta_steps as f32;
        let sin_theta = (PI * v).sin();
        for i in 0..config.phi_steps {
            let l = direction_of((i as f32 + 0.5) / config.phi_steps as f32, v);
            let c = n.dot(&l);
            if c > 0.0 {
                sum += lookup(env, &l) * (c * sin_theta);
            }
        }
    }
    let e = sum * (dphi * dtheta / PI);
    [e.x, e.y, e.z]
}

fn reflectance_at(env: &PixelBuffer<Rgba>, n: &Vector3<f32>, roughness: f32, samples: u32) -> Rgb {
    let mut sum = Vector3::<f32>::zeros();
    let mut weight = 0.0f32;
    for i in 0..samples {
        let h = importance_sample_ggx(hammersley(i, samples), n, roughness);
        let l = (h * (2.0 * n.dot(&h)) - n).normalize();
        let n_dot_l = n.dot(&l);
        if n_dot_l > 0.0 {
            sum += lookup(env, &l) * n_dot_l;
            weight += n_dot_l;
        }
    }
    let c = if weight > 0.0 {
        sum / weight
    } else {
        lookup(env, n)
    };
    [c.x, c.y, c.z]
}

fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    // ibl remap of k, analytic lights would use (r + 1)^2 / 8
    let k = roughness * roughness / 2.0;
    let schlick = |x: f32| x / (x * (1.0 - k) + k);
    schlick(n_dot_v) * schlick(n_dot_l)
}

fn integrate_brdf(n_dot_v: f32, roughness: f32, samples: u32) -> Rg {
    let v = Vector3::new((1.0 - n_dot_v * n_dot_v).sqrt(), 0.0, n_dot_v);
    let n = Vector3::z();
    let mut scale = 0.0;
    let mut bias = 0.0;
    for i in 0..samples {
        let h = importance_sample_ggx(hammersley(i, samples), &n, roughness);
        let l = (h * (2.0 * v.dot(&h)) - v).normalize();
        let n_dot_l = l.z.max(0.0);
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(&h).max(0.0);
        if n_dot_l > 0.0 {
            let g_vis = geometry_smith(n_dot_v, n_dot_l, roughness) * v_dot_h / (n_dot_h * n_dot_v);
            let fc = (1.0 - v_dot_h).powi(5);
            scale += (1.0 - fc) * g_vis;
            bias += fc * g_vis;
        }
    }
    [scale / samples as f32, bias / samples as f32]
}

impl Kernels for CpuKernels {
    fn irradiate(&self, env: &PixelBuffer<Rgba>) -> Result<PixelBuffer<Rgb>, KernelError> {
        let (width, height) = (env.width(), env.height());
        par_image(width, height, |x, y| {
            let (u, v) = texel_center(x, y, width, height);
            irradiance_at(env, &direction_of(u, v), &self.config)
        })
    }

    fn map_reflectance(
        &self,
        env: &PixelBuffer<Rgba>,
        roughness: f32,
    ) -> Result<PixelBuffer<Rgb>, KernelError> {
        let (width, height) = (env.width(), env.height());
        par_image(width, height, |x, y| {
            let (u, v) = texel_center(x, y, width, height);
            reflectance_at(env, &direction_of(u, v), roughness, self.config.samples)
        })
    }

    fn generate_brdf_lut(&self, width: u32, height: u32) -> Result<PixelBuffer<Rg>, KernelError> {
        par_image(width, height, |x, y| {
            let (n_dot_v, roughness) = texel_center(x, y, width, height);
            integrate_brdf(n_dot_v, roughness, self.config.samples)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn constant_env(width: u32, height: u32, c: f32) -> PixelBuffer<Rgba> {
        PixelBuffer::from_fn(width, height, |_, _| [c, c * 0.5, c * 0.25, 1.0])
    }

    fn quick() -> CpuKernels {
        CpuKernels::new(KernelConfig {
            phi_steps: 64,
            theta_steps: 32,
            samples: 128,
        })
    }

    #[test]
    fn mapping_round_trips_texel_centers() {
        let env = PixelBuffer::from_fn(16, 8, |x, y| [x as f32, y as f32, 0.0, 1.0]);
        for y in 0..8 {
            for x in 0..16 {
                let (u, v) = texel_center(x, y, 16, 8);
                let c = lookup(&env, &direction_of(u, v));
                assert_eq!((c.x as u32, c.y as u32), (x, y));
            }
        }
    }

    #[test]
    fn empty_environment_is_black() {
        let env = PixelBuffer::<Rgba>::new(0, 0, vec![]).unwrap();
        assert_eq!(lookup(&env, &Vector3::y()), Vector3::zeros());
        assert_eq!(quick().irradiate(&env).unwrap().len(), 0);
    }

    #[test]
    fn constant_environment_irradiance() {
        let env = constant_env(8, 4, 2.0);
        let out = quick().irradiate(&env).unwrap();
        assert_eq!((out.width(), out.height()), (8, 4));
        for p in out.pixels() {
            assert_relative_eq!(p[0], 2.0, max_relative = 1e-2);
            assert_relative_eq!(p[1], 1.0, max_relative = 1e-2);
            assert_relative_eq!(p[2], 0.5, max_relative = 1e-2);
        }
    }

    #[test]
    fn sky_lights_upward_normals() {
        // bright upper hemisphere, black ground
        let env = PixelBuffer::from_fn(32, 16, |_, y| {
            if y < 8 {
                [1.0, 1.0, 1.0, 1.0]
            } else {
                [0.0, 0.0, 0.0, 1.0]
            }
        });
        let out = quick().irradiate(&env).unwrap();
        assert!(out.get(0, 0).unwrap()[0] > 0.95);
        assert!(out.get(0, 15).unwrap()[0] < 0.05);
    }

    #[test]
    fn constant_environment_reflectance() {
        let env = constant_env(8, 4, 3.0);
        let kernels = quick();
        for roughness in [0.1, 0.5, 1.0] {
            let out = kernels.map_reflectance(&env, roughness).unwrap();
            assert_eq!(out.len(), 32);
            for p in out.pixels() {
                assert_relative_eq!(p[0], 3.0, max_relative = 1e-4);
                assert_relative_eq!(p[2], 0.75, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn smooth_reflectance_keeps_detail() {
        let env = PixelBuffer::from_fn(16, 8, |x, y| [(x + 16 * y) as f32, 0.0, 0.0, 1.0]);
        let out = quick().map_reflectance(&env, 0.01).unwrap();
        // a near mirror should give back the texel it looks at
        assert_relative_eq!(out.get(5, 3).unwrap()[0], 53.0, max_relative = 1e-3);
    }

    #[test]
    fn brdf_lut_shape_and_limits() {
        let lut = quick().generate_brdf_lut(32, 32).unwrap();
        assert_eq!((lut.width(), lut.height()), (32, 32));
        for p in lut.pixels() {
            assert!(p[0].is_finite() && p[1].is_finite());
            assert!(p[0] >= 0.0 && p[1] >= 0.0);
        }
        // grazing angles are too noisy at this sample count to bound tightly
        for y in 0..32 {
            for x in 8..32 {
                let [scale, bias] = lut.get(x, y).unwrap();
                assert!(scale + bias < 1.1);
            }
        }
        // head-on, mirror-like: everything is scale, nothing is bias
        let [scale, bias] = lut.get(31, 0).unwrap();
        assert_relative_eq!(scale, 1.0, epsilon = 0.05);
        assert!(bias < 0.01);
    }
}
