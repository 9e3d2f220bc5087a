use serde::{Deserialize, Serialize};

/// offer中按名字汇总后的资源量
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
}

/// 一次offer能承载的新executor数与任务数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub executors: usize,
    pub tasks: usize,
}

impl Capacity {
    /// executors = ⌊cpus / cpu_per_executor⌋，tasks = ⌊min(mem / mem_per_task, disk / disk_per_task)⌋
    pub fn calculate(
        totals: &ResourceTotals,
        cpu_per_executor: f64,
        mem_per_task: f64,
        disk_per_task: f64,
    ) -> Self {
        let executors = floor_ratio(totals.cpus, cpu_per_executor);
        let tasks = floor_ratio(totals.mem, mem_per_task).min(floor_ratio(totals.disk, disk_per_task));
        Self { executors, tasks }
    }

    /// 空闲executor复用时不消耗cpu，任务数上限仍由mem/disk决定
    pub fn slave_capacity(&self, idle_executors: usize) -> usize {
        (self.executors + idle_executors).min(self.tasks)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks == 0
    }
}

fn floor_ratio(amount: f64, unit: f64) -> usize {
    if unit <= 0.0 || !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    (amount / unit).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_floors_each_dimension() {
        let totals = ResourceTotals {
            cpus: 3.9,
            mem: 1000.0,
            disk: 5000.0,
        };
        let capacity = Capacity::calculate(&totals, 1.0, 256.0, 1024.0);
        assert_eq!(capacity.executors, 3);
        assert_eq!(capacity.tasks, 3);
    }

    #[test]
    fn test_slave_capacity_counts_idle_executors() {
        let capacity = Capacity {
            executors: 1,
            tasks: 5,
        };
        assert_eq!(capacity.slave_capacity(0), 1);
        assert_eq!(capacity.slave_capacity(2), 3);
        assert_eq!(capacity.slave_capacity(10), 5);
    }

    #[test]
    fn test_zero_unit_yields_no_capacity() {
        let totals = ResourceTotals {
            cpus: 4.0,
            mem: 4096.0,
            disk: 0.0,
        };
        let capacity = Capacity::calculate(&totals, 0.0, 256.0, 1024.0);
        assert_eq!(capacity.executors, 0);
        assert_eq!(capacity.tasks, 0);
        assert!(capacity.is_empty());
    }
}
