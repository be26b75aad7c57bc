use activation_bench::cli::Cli;
use clap::Parser;

#[cfg(any(
    feature = "ndarray",
    feature = "ndarray-blas-netlib",
    feature = "ndarray-blas-openblas",
))]
mod ndarray {
    use activation_bench::{cli::Cli, training};
    use anyhow::Result;
    use burn::backend::ndarray::{NdArray, NdArrayDevice};
    use burn::backend::Autodiff;

    pub fn run(cli: Cli) -> Result<()> {
        training::run::<Autodiff<NdArray>>(cli, NdArrayDevice::Cpu)
    }
}

#[cfg(feature = "tch-cpu")]
mod tch_cpu {
    use activation_bench::{cli::Cli, training};
    use anyhow::Result;
    use burn::backend::libtorch::{LibTorch, LibTorchDevice};
    use burn::backend::Autodiff;

    pub fn run(cli: Cli) -> Result<()> {
        training::run::<Autodiff<LibTorch>>(cli, LibTorchDevice::Cpu)
    }
}

#[cfg(feature = "tch-gpu")]
mod tch_gpu {
    use activation_bench::{cli::Cli, training};
    use anyhow::Result;
    use burn::backend::libtorch::{LibTorch, LibTorchDevice};
    use burn::backend::Autodiff;

    pub fn run(cli: Cli) -> Result<()> {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;
        training::run::<Autodiff<LibTorch>>(cli, device)
    }
}

#[cfg(feature = "wgpu")]
mod wgpu {
    use activation_bench::{cli::Cli, training};
    use anyhow::Result;
    use burn::backend::wgpu::{Wgpu, WgpuDevice};
    use burn::backend::Autodiff;

    pub fn run(cli: Cli) -> Result<()> {
        training::run::<Autodiff<Wgpu>>(cli, WgpuDevice::default())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    #[cfg(any(
        feature = "ndarray",
        feature = "ndarray-blas-netlib",
        feature = "ndarray-blas-openblas",
    ))]
    ndarray::run(cli.clone())?;
    #[cfg(feature = "tch-cpu")]
    tch_cpu::run(cli.clone())?;
    #[cfg(feature = "tch-gpu")]
    tch_gpu::run(cli.clone())?;
    #[cfg(feature = "wgpu")]
    wgpu::run(cli.clone())?;

    let _ = cli;
    Ok(())
}
