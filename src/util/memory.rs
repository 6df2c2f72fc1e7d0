use std::fs;

/// Resident set size of this process in bytes, when the platform exposes it.
pub fn resident_bytes() -> Option<u64> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

/// Highest resident size seen since the last reset.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeakMemory {
    peak: u64,
}

impl PeakMemory {
    pub fn sample(&mut self) -> u64 {
        let current = resident_bytes().unwrap_or(0);
        self.peak = self.peak.max(current);
        current
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }

    pub fn reset(&mut self) {
        self.peak = 0;
    }
}
