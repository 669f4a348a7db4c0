//! 缓冲层的编译期常量

/// 请求项总数
pub const NR_REQUEST: usize = 32;
/// 写请求只能使用前 2/3 的请求项，后 1/3 留给读
pub const NR_WRITE_REQUEST: usize = NR_REQUEST * 2 / 3;

/// 哈希桶个数
pub const NR_HASH: usize = 307;

/// 主设备号的上限（不含）
pub const NR_BLK_DEV: usize = 7;

/// 驱动放弃一个请求之前的默认出错次数
pub const MAX_ERRORS: u32 = 7;

/// 一页包含的块数，用于整页读取
pub const PAGE_BLOCKS: usize = 4;
