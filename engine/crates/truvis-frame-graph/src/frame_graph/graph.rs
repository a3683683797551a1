//! 依赖图
//!
//! 由节点的前驱列表构建 DAG，用于校验、分层和打印执行计划。
//! 所有边都从先声明的节点指向后声明的节点，因此声明顺序本身就是一个合法的拓扑序。

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::handle::NodeHandle;

/// 依赖图
pub struct DependencyGraph {
    node_count: usize,
    /// 邻接表（出边）：node -> [successor]
    successors: Vec<Vec<usize>>,
    /// 邻接表（入边）：node -> [predecessor]
    predecessors: Vec<Vec<usize>>,
    edge_count: usize,
}

impl DependencyGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            successors: vec![Vec::new(); node_count],
            predecessors: vec![Vec::new(); node_count],
            edge_count: 0,
        }
    }

    /// 从每个节点的前驱列表构建
    pub fn from_predecessors<'a>(node_predecessors: impl ExactSizeIterator<Item = &'a [NodeHandle]>) -> Self {
        let mut graph = Self::new(node_predecessors.len());
        for (consumer, predecessors) in node_predecessors.enumerate() {
            for producer in predecessors {
                graph.add_edge(producer.index(), consumer);
            }
        }
        graph
    }

    /// 添加依赖边：`producer` 先于 `consumer` 执行
    pub fn add_edge(&mut self, producer: usize, consumer: usize) {
        // 避免重复边
        if !self.successors[producer].contains(&consumer) {
            self.successors[producer].push(consumer);
            self.predecessors[consumer].push(producer);
            self.edge_count += 1;
        }
    }

    /// 执行拓扑排序
    ///
    /// 同时可执行的节点中总是先取下标最小的，因此无环时结果与声明顺序一致。
    ///
    /// # 返回
    /// - `Ok(order)`: 拓扑排序后的节点下标
    /// - `Err(cycle)`: 检测到循环依赖，返回参与循环的节点下标
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degrees: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut queue: BinaryHeap<Reverse<usize>> =
            (0..self.node_count).filter(|&i| in_degrees[i] == 0).map(Reverse).collect();
        let mut result = Vec::with_capacity(self.node_count);

        while let Some(Reverse(node)) = queue.pop() {
            result.push(node);

            for &neighbor in &self.successors[node] {
                in_degrees[neighbor] -= 1;
                if in_degrees[neighbor] == 0 {
                    queue.push(Reverse(neighbor));
                }
            }
        }

        if result.len() != self.node_count {
            let remaining: Vec<usize> = (0..self.node_count).filter(|&i| in_degrees[i] > 0).collect();
            Err(remaining)
        } else {
            Ok(result)
        }
    }

    /// 按依赖深度分层：同一层内的节点之间没有依赖，可以并行执行
    pub fn waves(&self) -> Vec<Vec<usize>> {
        let mut levels = vec![0usize; self.node_count];
        let mut waves: Vec<Vec<usize>> = Vec::new();

        // 前驱的下标总是更小，按下标顺序遍历即可
        for node in 0..self.node_count {
            let level = self.predecessors[node].iter().map(|&p| levels[p] + 1).max().unwrap_or(0);
            levels[node] = level;
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(node);
        }

        waves
    }

    /// 获取节点的直接依赖（前驱）
    #[inline]
    pub fn get_predecessors(&self, node: usize) -> &[usize] {
        &self.predecessors[node]
    }

    /// 获取节点的直接后继
    #[inline]
    pub fn get_successors(&self, node: usize) -> &[usize] {
        &self.successors[node]
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}
