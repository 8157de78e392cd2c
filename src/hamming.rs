use bytemuck::try_cast_slice;

/// 计算两个二进制描述子的汉明距离，两者长度必须一致
#[inline(always)]
pub fn hamming(va: &[u8], vb: &[u8]) -> u32 {
    debug_assert_eq!(va.len(), vb.len());
    match va.len() {
        32 => hamming_256(va, vb),
        _ => hamming_naive(va, vb),
    }
}

#[inline(always)]
pub fn hamming_naive(va: &[u8], vb: &[u8]) -> u32 {
    va.iter().zip(vb).map(|(a, b)| (a ^ b).count_ones()).sum()
}

/// ORB 描述子的快速路径，按 u64 计算
#[inline(always)]
pub fn hamming_256(va: &[u8], vb: &[u8]) -> u32 {
    // 未对齐时 cast 会失败，退回逐字节计算
    let (Ok(va), Ok(vb)) = (try_cast_slice::<u8, u64>(va), try_cast_slice::<u8, u64>(vb)) else {
        return hamming_naive(va, vb);
    };
    (va[0] ^ vb[0]).count_ones()
        + (va[1] ^ vb[1]).count_ones()
        + (va[2] ^ vb[2]).count_ones()
        + (va[3] ^ vb[3]).count_ones()
}
