use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use smallvec::SmallVec;

use crate::nearly::{DEFAULT_TOLERANCE, is_nearly_equal};

/// 无效的点索引，表示「此处没有结果」
pub const NO_ID: i64 = -1;

/// 一条最近邻候选，由距离和点索引组成
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f64,
    pub id: i64,
}

impl Default for Neighbor {
    fn default() -> Self {
        Self { distance: f64::INFINITY, id: NO_ID }
    }
}

/// 目前为止距离最小的 k 条候选，并列时无偏随机取舍
///
/// 空间索引（kd 树、球树）遍历时发现候选的顺序与距离无关，本结构持续
/// 维护已见候选中最近的 k 条，并通过 [`TopK::max_distance`] 对外提供
/// 剪枝半径。与第 k 小距离并列（容差内近似相等）的候选不按到达顺序
/// 取舍，而是记入并列候选桶，读出时无放回地随机抽取。否则先被遍历到
/// 的候选会被确定性地偏向，污染依赖 k 近邻结果的下游统计。
///
/// 槽位数组始终按距离升序排列，`tie_start` 之前的槽位没有争议，
/// 读取幂等；`tie_start` 起的槽位与桶中候选可互换。
#[derive(Debug)]
pub struct TopK {
    /// 容量 k
    k: usize,
    /// 当前持有的真实条目数量
    len: usize,
    /// 长度为 k 的有序数组，空槽位距离为 INFINITY
    slots: Vec<Neighbor>,
    /// 第一个与当前最差已接纳距离并列的槽位下标
    tie_start: usize,
    /// 与最差已接纳距离并列的全部候选，数量可以超过剩余槽位
    tie_bucket: SmallVec<[Neighbor; 8]>,
    /// 近似相等容差
    tolerance: f64,
    /// 实例私有的随机源，仅用于并列候选的无偏抽取
    rng: SmallRng,
}

impl TopK {
    /// 创建一个容量为 k 的空结构，随机源从系统熵初始化
    pub fn new(k: usize) -> Self {
        Self::from_rng(k, &mut rand::rng())
    }

    /// 创建一个容量为 k 的空结构，随机源从调用方提供的熵源派生
    ///
    /// 每个实例持有独立的随机源，互不共享；要求 k >= 1。
    pub fn from_rng(k: usize, rng: &mut impl RngCore) -> Self {
        assert!(k >= 1, "capacity must be at least 1");
        Self {
            k,
            len: 0,
            slots: vec![Neighbor::default(); k],
            tie_start: 0,
            tie_bucket: SmallVec::new(),
            tolerance: DEFAULT_TOLERANCE,
            rng: SmallRng::from_rng(rng),
        }
    }

    /// 使用固定种子创建，保证抽取结果可重现
    pub fn with_seed(k: usize, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        Self::from_rng(k, &mut rng)
    }

    /// 设置近似相等容差，默认值见 [`DEFAULT_TOLERANCE`]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        assert!(tolerance.is_finite() && tolerance >= 0.0);
        self.tolerance = tolerance;
        self
    }

    /// 容量 k
    pub fn k(&self) -> usize {
        self.k
    }

    /// 当前持有的条目数量
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 当前最小的已接纳距离，空结构返回 INFINITY
    pub fn min_distance(&self) -> f64 {
        self.slots[0].distance
    }

    /// 当前的剪枝半径，即第 k 小的已接纳距离
    ///
    /// 未满时返回 INFINITY，表示候选还不够多，尚无有效剪枝界。
    /// 结构满后该值随插入单调不增。
    pub fn max_distance(&self) -> f64 {
        if self.len == self.k { self.slots[self.k - 1].distance } else { f64::INFINITY }
    }

    /// 第 i 小的距离（0 起始），i >= len 时返回 INFINITY
    ///
    /// 只读且幂等。
    pub fn distance(&self, i: usize) -> f64 {
        if i < self.len { self.slots[i].distance } else { f64::INFINITY }
    }

    /// 第 i 小条目的点索引（0 起始），i >= len 时返回 [`NO_ID`]
    ///
    /// 并列边界之前的位置没有争议，读取幂等。落在并列区域内的位置会从
    /// 并列候选桶中无放回地随机抽取一个条目，**该读取是破坏性的**：
    /// 遍历结束后，调用方必须对 [0, len) 内每个下标恰好读取一次（顺序
    /// 任意），才能得到一份对并列候选无偏、无重复的抽样。对同一并列
    /// 下标的重复读取会拿到错误的结果；若桶已被耗尽则返回 [`NO_ID`]。
    /// 想避开这条约定可改用 [`TopK::into_sorted_vec`]。
    pub fn take_id(&mut self, i: usize) -> i64 {
        if i >= self.len {
            return NO_ID;
        }
        if i < self.tie_start {
            return self.slots[i].id;
        }
        match self.tie_bucket.len() {
            0 => NO_ID,
            1 => self.tie_bucket[0].id,
            n => {
                let j = self.rng.random_range(0..n);
                self.tie_bucket.swap_remove(j).id
            }
        }
    }

    /// 插入一条候选
    ///
    /// * `distance` - 候选与查询点的距离，要求为有限非负值
    /// * `id` - 候选的点索引
    ///
    /// 与当前最差已接纳距离并列的候选进入候选桶；比它更差的直接丢弃；
    /// 严格更近的按序插入。无并列移动时摊还代价为 O(log k) 次比较加
    /// 一次有序插入，并列组整体换代时退化为 O(k)。
    pub fn insert(&mut self, distance: f64, id: i64) {
        debug_assert!(distance >= 0.0 && distance.is_finite());
        let worst = self.slots[self.k - 1].distance;
        if is_nearly_equal(worst, distance, self.tolerance) {
            // 与当前最差已接纳距离并列，只进桶，不占槽位
            self.tie_bucket.push(Neighbor { distance, id });
        } else if distance > worst {
            return;
        } else {
            let new = Neighbor { distance, id };
            if self.k == 1 || strictly_less(self.slots[self.k - 2].distance, distance, self.tolerance)
            {
                // 新条目的正确位置恰好是最后一个槽位，旧的并列组整体作废
                self.slots[self.k - 1] = new;
                self.tie_bucket.clear();
                self.tie_bucket.push(new);
                self.tie_start = self.k - 1;
            } else {
                // 在无争议前缀内二分定位插入，旧的最差条目从末尾滑出
                let tol = self.tolerance;
                let pos = self.slots[..self.tie_start]
                    .partition_point(|e| strictly_less(e.distance, distance, tol));
                self.slots.insert(pos, new);
                self.slots.pop();
                if self.tie_start == self.k - 1 {
                    // 插入前并列区域恰好只有最后一个槽位，这次插入把新的
                    // 一组并列条目推到了边界上：重新定位边界，并用边界起
                    // 的槽位重建候选桶。旧桶中的候选与已被取代的旧最差
                    // 距离并列，全部丢弃。
                    let new_worst = self.slots[self.k - 1].distance;
                    self.tie_start = pos
                        + self.slots[pos..self.k - 1]
                            .partition_point(|e| strictly_less(e.distance, new_worst, tol));
                    self.tie_bucket.clear();
                    self.tie_bucket.extend_from_slice(&self.slots[self.tie_start..]);
                } else {
                    // 插入点在并列组之前，组成员不变，整体后移一位
                    self.tie_start += 1;
                }
            }
        }
        if self.len < self.k {
            self.len += 1;
        }
    }

    /// 一次性读出全部结果，按距离升序排列
    ///
    /// 等价于对 [0, len) 内每个下标恰好调用一次 [`TopK::take_id`]，
    /// 并列区域的无偏抽取在此处完成，调用方无需关心读取次数约定。
    pub fn into_sorted_vec(mut self) -> Vec<Neighbor> {
        let len = self.len;
        debug!("读出 {} 条结果，{} 个候选竞争 {} 个并列槽位", len, self.tie_bucket.len(), len - self.tie_start);
        (0..len)
            .map(|i| Neighbor { distance: self.slots[i].distance, id: self.take_id(i) })
            .collect()
    }

    /// 合并另一实例，用于并行遍历不相交子树后的归并
    ///
    /// other 的无争议条目与其全部并列候选逐条重新插入本实例，因此合并
    /// 后的读出对所有并列候选仍然无偏。要求 other 尚未被读取过。
    pub fn merge(&mut self, other: TopK) {
        debug_assert!(other.tie_start <= other.len);
        debug!("合并 {} 条无争议条目与 {} 个并列候选", other.tie_start, other.tie_bucket.len());
        for e in &other.slots[..other.tie_start] {
            self.insert(e.distance, e.id);
        }
        for e in &other.tie_bucket {
            self.insert(e.distance, e.id);
        }
    }

    /// 清空结构以便复用，容量、容差与随机源保持不变
    pub fn clear(&mut self) {
        self.slots.fill(Neighbor::default());
        self.len = 0;
        self.tie_start = 0;
        self.tie_bucket.clear();
    }
}

/// a 是否严格小于 b，近似相等视为不小于
#[inline(always)]
fn strictly_less(a: f64, b: f64, tolerance: f64) -> bool {
    a < b && !is_nearly_equal(a, b, tolerance)
}
