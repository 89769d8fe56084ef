/// 默认的近似相等容差
///
/// 经验值：对同一对点，不同的坐标求和顺序会让距离产生约机器精度量级的
/// 舍入误差，1e-9 足以把这类误差判为并列，又不会把真正不同的距离混为一谈。
/// 对误差特性不同的距离度量，可以通过 [`crate::TopK::with_tolerance`] 调整。
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// 判断两个距离是否在容差范围内近似相等
///
/// 采用相对/绝对混合容差：`|a - b| <= tolerance * max(1, |a|, |b|)`，
/// 幅值小于 1 时表现为绝对容差，大于 1 时表现为相对容差。
/// 非有限值只与自身相等，空槽位的 INFINITY 永远不会与有限距离并列。
#[inline(always)]
pub fn is_nearly_equal(a: f64, b: f64, tolerance: f64) -> bool {
    if a == b {
        return true;
    }
    if !(a.is_finite() && b.is_finite()) {
        return false;
    }
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}
