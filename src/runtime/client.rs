//! Runtime client configuration

/// Configuration for the container runtime client
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Container engine CLI (`docker`, `podman`, or a full path)
    pub binary: String,

    /// Extra arguments inserted after `run`, before the image
    pub extra_args: Vec<String>,

    /// Bind-mount local output directories into the container
    pub mount_outputs: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            extra_args: Vec::new(),
            mount_outputs: true,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn with_mount_outputs(mut self, mount: bool) -> Self {
        self.mount_outputs = mount;
        self
    }
}
