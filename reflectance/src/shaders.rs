use std::{borrow::Cow, fmt::Write, path::PathBuf};

use naga::{
    front::glsl,
    valid::{Capabilities, ValidationFlags, Validator},
};
use wgpu::{Device, ShaderModule, ShaderModuleDescriptor, ShaderSource};

// naga only takes the 4xx core profiles
const GLSL_VERSION: &str = "450";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl From<ShaderStage> for naga::ShaderStage {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        }
    }
}

/// Where a shader body comes from. Built-in shaders are baked into the binary,
/// anything else is read when the program is compiled.
#[derive(Debug, Clone)]
pub enum ShaderInput {
    File(PathBuf),
    Embedded {
        name: &'static str,
        source: &'static str,
    },
}

impl ShaderInput {
    pub fn name(&self) -> String {
        match self {
            ShaderInput::File(path) => path.display().to_string(),
            ShaderInput::Embedded { name, .. } => name.to_string(),
        }
    }

    fn read(&self) -> Result<Cow<'static, str>, ShaderError> {
        match self {
            ShaderInput::File(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|source| ShaderError::Missing {
                    path: path.clone(),
                    source,
                }),
            ShaderInput::Embedded { source, .. } => Ok(Cow::Borrowed(*source)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgramOptions {
    pub lights: usize,
    pub materials: usize,
    pub defines: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("couldn't read shader {path:?}: {source}")]
    Missing {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("GL Compile error in {name}:\n{log}")]
    Compile { name: String, log: String },
    #[error("can't link {name}: a {stage:?} shader is already attached")]
    Link { name: String, stage: ShaderStage },
    #[error("program has no {0:?} shader")]
    NoStage(ShaderStage),
}

/// Fully preprocessed source of one shader, ready for the compiler.
#[derive(Debug)]
pub struct ShaderSourceText {
    pub name: String,
    pub stage: ShaderStage,
    pub text: String,
}

pub struct ShaderProgram {
    modules: Vec<(ShaderStage, ShaderModule)>,
}

impl ShaderProgram {
    pub fn module(&self, stage: ShaderStage) -> Result<&ShaderModule, ShaderError> {
        self.modules
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, module)| module)
            .ok_or(ShaderError::NoStage(stage))
    }
}

fn preamble(options: &ProgramOptions) -> String {
    let mut src = String::new();
    // writing to a String can't fail
    let _ = writeln!(src, "#version {}", GLSL_VERSION);
    let _ = writeln!(src, "#extension GL_ARB_uniform_buffer_object : enable");
    for flag in &options.defines {
        let _ = writeln!(src, "#define {}", flag);
    }
    let _ = writeln!(src, "const int Nlights={};", options.lights);
    let _ = writeln!(src, "const int Nmaterials={};", options.materials);
    src
}

pub fn preprocess(
    input: &ShaderInput,
    stage: ShaderStage,
    options: &ProgramOptions,
) -> Result<ShaderSourceText, ShaderError> {
    let body = input.read()?;
    let mut text = preamble(options);
    text.push_str(&body);
    Ok(ShaderSourceText {
        name: input.name(),
        stage,
        text,
    })
}

/// Reads and preprocesses every shader of a program. Nothing touches the GPU
/// here so a missing file fails before any compilation starts.
pub fn load_program_sources(
    shaders: &[(ShaderInput, ShaderStage)],
    options: &ProgramOptions,
) -> Result<Vec<ShaderSourceText>, ShaderError> {
    shaders
        .iter()
        .map(|(input, stage)| preprocess(input, *stage, options))
        .collect()
}

/// Runs naga over the source so we get the whole diagnostic log back instead of
/// wgpu's uncaptured error handler panicking on us.
pub fn check(source: &ShaderSourceText) -> Result<(), ShaderError> {
    let mut parser = glsl::Parser::default();
    let options = glsl::Options::from(naga::ShaderStage::from(source.stage));
    let log = match parser.parse(&options, &source.text) {
        Ok(module) => {
            let mut validator = Validator::new(ValidationFlags::all(), Capabilities::empty());
            match validator.validate(&module) {
                Ok(_) => return Ok(()),
                Err(e) => e.as_inner().to_string(),
            }
        }
        Err(errors) => errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n"),
    };
    log::error!("{}", log);
    log::error!("GL Compile error");
    log::error!("{}", source.text);
    Err(ShaderError::Compile {
        name: source.name.clone(),
        log,
    })
}

pub fn compile_and_link(
    device: &Device,
    shaders: &[(ShaderInput, ShaderStage)],
    options: &ProgramOptions,
) -> Result<ShaderProgram, ShaderError> {
    let sources = load_program_sources(shaders, options)?;
    for (i, source) in sources.iter().enumerate() {
        if sources[..i].iter().any(|s| s.stage == source.stage) {
            return Err(ShaderError::Link {
                name: source.name.clone(),
                stage: source.stage,
            });
        }
        check(source)?;
    }

    // the preprocessed text is dropped as soon as each module exists
    let modules = sources
        .into_iter()
        .map(|source| {
            log::debug!("compiling {} ({:?})", source.name, source.stage);
            let module = device.create_shader_module(ShaderModuleDescriptor {
                label: Some(&source.name),
                source: ShaderSource::Glsl {
                    shader: Cow::Owned(source.text),
                    stage: source.stage.into(),
                    defines: Default::default(),
                },
            });
            (source.stage, module)
        })
        .collect();
    Ok(ShaderProgram { modules })
}
