mod docker;

pub use docker::ContainerCliRuntime;
