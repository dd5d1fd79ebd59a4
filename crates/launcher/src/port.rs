// port.rs
// 主端口选择器：在 [25000, 30000] 内随机抽取端口，可选地探测端口是否可绑定。
use crate::config::LaunchConfig;
use crate::types::{PORT_RANGE_END, PORT_RANGE_START};
use rand::Rng;
use std::net::{Ipv4Addr, TcpListener};
use tracing::{debug, warn};

/// 在端口范围内均匀抽取一个端口
pub fn pick_port<R: Rng + ?Sized>(rng: &mut R) -> u16 {
    rng.gen_range(PORT_RANGE_START..=PORT_RANGE_END)
}

/// 探测端口当前能否在本机绑定，探测完成后立即释放
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}

/// 端口选择器
#[derive(Debug, Clone)]
pub struct PortPicker {
    /// 固定端口，设置后不再随机
    pub fixed: Option<u16>,
    /// 是否探测可用性
    pub check_available: bool,
    /// 最大抽取次数
    pub attempts: u32,
}

impl Default for PortPicker {
    fn default() -> Self {
        Self {
            fixed: None,
            check_available: true,
            attempts: 16,
        }
    }
}

impl PortPicker {
    pub fn from_config(config: &LaunchConfig) -> Self {
        Self {
            fixed: config.port,
            check_available: config.check_port,
            attempts: config.port_attempts.max(1),
        }
    }

    /// 使用线程本地随机数选择端口
    pub fn pick(&self) -> u16 {
        self.pick_with(&mut rand::thread_rng())
    }

    /// 使用给定的随机数生成器选择端口
    pub fn pick_with<R: Rng + ?Sized>(&self, rng: &mut R) -> u16 {
        self.pick_with_check(rng, is_port_available)
    }

    /// 使用给定的随机数生成器和可用性判断选择端口
    ///
    /// 最多抽取 `attempts` 次，返回第一个 `available` 为真的端口；
    /// 全部不可用时返回最后一次抽取的端口。
    pub fn pick_with_check<R, F>(&self, rng: &mut R, available: F) -> u16
    where
        R: Rng + ?Sized,
        F: Fn(u16) -> bool,
    {
        if let Some(port) = self.fixed {
            debug!(port, "使用固定主端口");
            return port;
        }
        if !self.check_available {
            return pick_port(rng);
        }

        let mut last = pick_port(rng);
        for attempt in 1..=self.attempts.max(1) {
            if attempt > 1 {
                last = pick_port(rng);
            }
            if available(last) {
                debug!(port = last, attempt, "选中可用主端口");
                return last;
            }
            debug!(port = last, attempt, "端口已被占用，重新抽取");
        }

        // 全部探测失败时仍返回最后一次抽取，交给外部启动器报错
        warn!(port = last, attempts = self.attempts, "未找到可用端口，继续使用最后一次抽取的端口");
        last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::port_in_range;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;

    #[test]
    fn test_pick_port_always_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            assert!(port_in_range(pick_port(&mut rng)));
        }
    }

    #[test]
    fn test_unchecked_picker_draws_once() {
        let picker = PortPicker { check_available: false, ..Default::default() };
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        assert_eq!(picker.pick_with(&mut a), pick_port(&mut b));
    }

    #[test]
    fn test_fixed_port_wins() {
        let picker = PortPicker { fixed: Some(29500), ..Default::default() };
        assert_eq!(picker.pick(), 29500);
    }

    #[test]
    fn test_checked_picker_returns_bindable_port() {
        let picker = PortPicker::default();
        let port = picker.pick();
        assert!(port_in_range(port));
    }

    #[test]
    fn test_occupied_draws_are_skipped() {
        let picker = PortPicker { attempts: 8, ..Default::default() };
        let mut expected = StdRng::seed_from_u64(3);
        let draws: Vec<u16> = (0..3).map(|_| pick_port(&mut expected)).collect();

        let calls = Cell::new(0u32);
        let mut rng = StdRng::seed_from_u64(3);
        let port = picker.pick_with_check(&mut rng, |_| {
            calls.set(calls.get() + 1);
            calls.get() > 2
        });
        assert_eq!(port, draws[2]);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_all_occupied_returns_last_draw() {
        let picker = PortPicker { attempts: 5, ..Default::default() };
        let mut expected = StdRng::seed_from_u64(11);
        let draws: Vec<u16> = (0..5).map(|_| pick_port(&mut expected)).collect();

        let calls = Cell::new(0u32);
        let mut rng = StdRng::seed_from_u64(11);
        let port = picker.pick_with_check(&mut rng, |_| {
            calls.set(calls.get() + 1);
            false
        });
        assert_eq!(port, draws[4]);
        assert_eq!(calls.get(), 5);
    }

    #[test]
    fn test_attempts_limit_is_respected() {
        for attempts in [1, 2, 16] {
            let picker = PortPicker { attempts, ..Default::default() };
            let calls = Cell::new(0u32);
            let mut rng = StdRng::seed_from_u64(u64::from(attempts));
            let port = picker.pick_with_check(&mut rng, |_| {
                calls.set(calls.get() + 1);
                false
            });
            assert!(port_in_range(port));
            assert_eq!(calls.get(), attempts);
        }
    }

    #[test]
    fn test_fixed_and_unchecked_skip_availability() {
        let calls = Cell::new(0u32);
        let count = |_: u16| {
            calls.set(calls.get() + 1);
            false
        };
        let fixed = PortPicker { fixed: Some(29500), ..Default::default() };
        assert_eq!(fixed.pick_with_check(&mut StdRng::seed_from_u64(1), count), 29500);
        let unchecked = PortPicker { check_available: false, ..Default::default() };
        assert!(port_in_range(unchecked.pick_with_check(&mut StdRng::seed_from_u64(1), count)));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_occupied_port_is_reported() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_available(port));
    }
}
