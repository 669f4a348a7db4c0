use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
pub struct Cli {
    /// Disk image, created if missing
    #[arg(long, short)]
    pub image: PathBuf,

    /// Image size in blocks
    #[arg(long, default_value_t = 1024)]
    pub size: u32,

    /// Number of buffers in the cache
    #[arg(long, short, default_value_t = 16)]
    pub buffers: usize,

    /// Number of distinct blocks touched by the workload
    #[arg(long, default_value_t = 64)]
    pub blocks: u32,

    /// Number of concurrent tasks
    #[arg(long, short, default_value_t = 4)]
    pub tasks: usize,

    /// Rounds per task
    #[arg(long, short, default_value_t = 32)]
    pub rounds: u32,

    /// Fail one transfer out of every N, 0 to disable
    #[arg(long, default_value_t = 0)]
    pub fault_every: usize,
}
