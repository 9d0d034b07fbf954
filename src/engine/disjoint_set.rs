// ==========================================
// NRQZ 记录管理系统 - 并查集
// ==========================================
// 路径压缩 + 按秩合并
// 用途: 引用分组（build_groups）/ 疑似重复聚类（DuplicateFinder）
// ==========================================

use std::collections::BTreeMap;

// ==========================================
// DisjointSet - 以任意有序键为元素的并查集
// ==========================================
#[derive(Debug, Clone)]
pub struct DisjointSet<T>
where
    T: Ord + Clone,
{
    index: BTreeMap<T, usize>,
    items: Vec<T>,
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl<T> Default for DisjointSet<T>
where
    T: Ord + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DisjointSet<T>
where
    T: Ord + Clone,
{
    pub fn new() -> Self {
        Self {
            index: BTreeMap::new(),
            items: Vec::new(),
            parent: Vec::new(),
            rank: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index.contains_key(item)
    }

    /// 加入元素（已存在则返回原下标）
    pub fn insert(&mut self, item: T) -> usize {
        if let Some(&idx) = self.index.get(&item) {
            return idx;
        }
        let idx = self.items.len();
        self.index.insert(item.clone(), idx);
        self.items.push(item);
        self.parent.push(idx);
        self.rank.push(0);
        idx
    }

    fn find_idx(&mut self, idx: usize) -> usize {
        let mut root = idx;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // 路径压缩
        let mut current = idx;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// 查找代表元（元素不存在时返回 None）
    pub fn find(&mut self, item: &T) -> Option<T> {
        let idx = *self.index.get(item)?;
        let root = self.find_idx(idx);
        Some(self.items[root].clone())
    }

    /// 合并两个元素所在集合（不存在的元素先加入）
    ///
    /// # 返回
    /// - true: 发生了合并
    /// - false: 原本已在同一集合
    pub fn union(&mut self, a: T, b: T) -> bool {
        let ia = self.insert(a);
        let ib = self.insert(b);
        let ra = self.find_idx(ia);
        let rb = self.find_idx(ib);
        if ra == rb {
            return false;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }

    pub fn same_set(&mut self, a: &T, b: &T) -> bool {
        match (self.index.get(a).copied(), self.index.get(b).copied()) {
            (Some(ia), Some(ib)) => self.find_idx(ia) == self.find_idx(ib),
            _ => false,
        }
    }

    /// 全部集合; 集合内元素升序,集合之间按最小元素升序
    pub fn sets(&mut self) -> Vec<Vec<T>> {
        let mut by_root: BTreeMap<usize, Vec<T>> = BTreeMap::new();
        for idx in 0..self.items.len() {
            let root = self.find_idx(idx);
            by_root.entry(root).or_default().push(self.items[idx].clone());
        }
        let mut sets: Vec<Vec<T>> = by_root
            .into_values()
            .map(|mut members| {
                members.sort();
                members
            })
            .collect();
        sets.sort();
        sets
    }
}
