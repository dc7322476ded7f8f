//! Static catalog of coherent hardware/software bundles.
//!
//! Each blueprint describes one "valid identity state": every value drawn
//! from it is plausible alongside every other value, which is what keeps
//! a spoofed fingerprint from being an impossible device (an Apple GPU
//! on a Win32 platform, a 24-core budget laptop).

/// A (GPU vendor, GPU renderer) pair as reported by the unmasked WebGL
/// debug parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuPair {
    pub vendor: &'static str,
    pub renderer: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Immutable identity template. Weighted selection approximates market
/// share; all option lists are uniform draws at persona creation.
#[derive(Debug, Clone, Copy)]
pub struct Blueprint {
    pub id: &'static str,
    pub name: &'static str,
    pub market_share_weight: u32,
    pub platform: &'static str,
    /// UA template; `{version}` is replaced with the resolved browser
    /// major version.
    pub ua_template: &'static str,
    pub hardware_concurrency_options: &'static [u32],
    pub device_memory_options: &'static [u32],
    pub resolutions: &'static [Resolution],
    pub gpu_pairs: &'static [GpuPair],
}

pub static BLUEPRINTS: &[Blueprint] = &[
    Blueprint {
        id: "win10_performance_desktop",
        name: "Windows 10 Performance Desktop",
        market_share_weight: 30,
        platform: "Win32",
        ua_template: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version}.0.0.0 Safari/537.36",
        hardware_concurrency_options: &[8, 12, 16, 24],
        device_memory_options: &[16, 32],
        resolutions: &[
            Resolution { width: 1920, height: 1080 },
            Resolution { width: 2560, height: 1440 },
        ],
        gpu_pairs: &[
            GpuPair {
                vendor: "Google Inc. (NVIDIA)",
                renderer: "ANGLE (NVIDIA, NVIDIA GeForce RTX 3060 Direct3D11 vs_5_0 ps_5_0, D3D11)",
            },
            GpuPair {
                vendor: "Google Inc. (NVIDIA)",
                renderer: "ANGLE (NVIDIA, NVIDIA GeForce RTX 4070 Direct3D11 vs_5_0 ps_5_0, D3D11)",
            },
        ],
    },
    Blueprint {
        id: "mac_m1_laptop",
        name: "MacBook Air/Pro (M1/M2)",
        market_share_weight: 20,
        // Apple Silicon still reports MacIntel for web compatibility.
        platform: "MacIntel",
        ua_template: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version}.0.0.0 Safari/537.36",
        hardware_concurrency_options: &[8],
        device_memory_options: &[8, 16],
        resolutions: &[
            // Logical CSS-pixel resolutions under Retina scaling.
            Resolution { width: 1440, height: 900 },
            Resolution { width: 1536, height: 960 },
        ],
        gpu_pairs: &[
            GpuPair {
                vendor: "Google Inc. (Apple)",
                renderer: "ANGLE (Apple, Apple M1, OpenGL 4.1)",
            },
            GpuPair {
                vendor: "Google Inc. (Apple)",
                renderer: "ANGLE (Apple, Apple M2, OpenGL 4.1)",
            },
        ],
    },
    Blueprint {
        id: "win10_budget_laptop",
        name: "Windows 10 Budget Laptop",
        market_share_weight: 40,
        platform: "Win32",
        ua_template: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version}.0.0.0 Safari/537.36",
        hardware_concurrency_options: &[4, 8],
        device_memory_options: &[4, 8],
        resolutions: &[
            Resolution { width: 1366, height: 768 },
            Resolution { width: 1536, height: 864 },
        ],
        gpu_pairs: &[
            GpuPair {
                vendor: "Google Inc. (Intel)",
                renderer: "ANGLE (Intel, Intel(R) UHD Graphics Direct3D11 vs_5_0 ps_5_0, D3D11)",
            },
            GpuPair {
                vendor: "Google Inc. (Intel)",
                renderer: "ANGLE (Intel, Intel(R) Iris Xe Graphics Direct3D11 vs_5_0 ps_5_0, D3D11)",
            },
        ],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_not_empty() {
        assert!(!BLUEPRINTS.is_empty());
        for bp in BLUEPRINTS {
            assert!(bp.market_share_weight > 0, "{} has zero weight", bp.id);
            assert!(!bp.resolutions.is_empty());
            assert!(!bp.gpu_pairs.is_empty());
            assert!(!bp.hardware_concurrency_options.is_empty());
            assert!(!bp.device_memory_options.is_empty());
            assert!(bp.ua_template.contains("{version}"));
        }
    }

    #[test]
    fn gpu_pairs_plausible_for_platform() {
        for bp in BLUEPRINTS {
            for gpu in bp.gpu_pairs {
                let apple = gpu.renderer.contains("Apple");
                match bp.platform {
                    "Win32" => assert!(!apple, "{}: Apple GPU on Windows", bp.id),
                    "MacIntel" => assert!(apple, "{}: non-Apple GPU on Mac", bp.id),
                    other => panic!("unexpected platform {}", other),
                }
            }
        }
    }
}
