//! ROM-dependent smoke-test harness for the emulation core. Runs a suite of
//! checks against a provided ROM image and exits 0 on success, 1 on any
//! failure.

use clap::Parser;
use snes_core::api::Snes;
use snes_core::render::{RenderRequest, RenderService};
use std::path::PathBuf;
use std::process;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Unit,
    Integration,
    E2e,
    RomDependent,
    Core,
    Graphics,
    Editor,
}

impl Category {
    fn name(self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Integration => "integration",
            Self::E2e => "e2e",
            Self::RomDependent => "rom-dependent",
            Self::Core => "core",
            Self::Graphics => "graphics",
            Self::Editor => "editor",
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "yaze-test-runner",
    about = "Emulation-core test harness",
    disable_help_flag = false
)]
struct Args {
    /// Run tests that exercise interactive UI surfaces
    #[arg(long)]
    ui: bool,

    /// Show the GUI while running (host concern; accepted for compatibility)
    #[arg(long)]
    show_gui: bool,

    /// Minimal frame counts
    #[arg(long, conflicts_with_all = ["normal", "cinematic"])]
    fast: bool,

    /// Default frame counts
    #[arg(long, conflicts_with = "cinematic")]
    normal: bool,

    /// Generous frame counts for visual inspection
    #[arg(long)]
    cinematic: bool,

    /// ROM image to test against (falls back to YAZE_TEST_ROM_PATH)
    #[arg(long)]
    rom: Option<PathBuf>,

    /// Glob-style filter applied to test names
    #[arg(long)]
    pattern: Option<String>,

    /// Category filters; combine freely
    #[arg(long)]
    unit: bool,
    #[arg(long)]
    integration: bool,
    #[arg(long)]
    e2e: bool,
    #[arg(long)]
    rom_dependent: bool,
    #[arg(long)]
    core: bool,
    #[arg(long)]
    graphics: bool,
    #[arg(long)]
    editor: bool,

    /// Skip everything that needs a ROM image
    #[arg(long)]
    skip_rom_tests: bool,

    /// Opt in to UI-driving tests
    #[arg(long)]
    enable_ui_tests: bool,

    /// Verbose per-test logging
    #[arg(long)]
    verbose: bool,
}

struct Config {
    rom_path: Option<PathBuf>,
    pattern: Option<String>,
    categories: Vec<Category>,
    skip_rom_tests: bool,
    enable_ui_tests: bool,
    verbose: bool,
    frames: u32,
}

impl Config {
    fn from_args(args: Args) -> Self {
        let rom_path = args
            .rom
            .or_else(|| std::env::var_os("YAZE_TEST_ROM_PATH").map(PathBuf::from));
        let pattern = args.pattern;
        let skip_rom_tests =
            args.skip_rom_tests || env_flag("YAZE_SKIP_ROM_TESTS");
        let enable_ui_tests =
            args.enable_ui_tests || args.ui || env_flag("YAZE_ENABLE_UI_TESTS");
        let verbose = args.verbose || env_flag("YAZE_VERBOSE_TESTS");

        let mut categories = Vec::new();
        for (flag, category) in [
            (args.unit, Category::Unit),
            (args.integration, Category::Integration),
            (args.e2e, Category::E2e),
            (args.rom_dependent, Category::RomDependent),
            (args.core, Category::Core),
            (args.graphics, Category::Graphics),
            (args.editor, Category::Editor),
        ] {
            if flag {
                categories.push(category);
            }
        }

        let frames = if args.fast {
            30
        } else if args.cinematic {
            600
        } else {
            120
        };

        Self { rom_path, pattern, categories, skip_rom_tests, enable_ui_tests, verbose, frames }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Minimal `*`-wildcard matcher for `--pattern`.
fn glob_matches(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some(&pc), Some(&nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

struct TestCase {
    name: &'static str,
    category: Category,
    needs_rom: bool,
    run: fn(&Config, &[u8]) -> Result<(), String>,
}

const TESTS: &[TestCase] = &[
    TestCase {
        name: "core.boot_runs_frames",
        category: Category::Core,
        needs_rom: true,
        run: |config, rom| {
            let mut snes = Snes::new(rom.to_vec()).map_err(|e| e.to_string())?;
            for _ in 0..config.frames {
                snes.run_frame();
            }
            if snes.frame_count() < u64::from(config.frames) {
                return Err(format!("only {} frames ran", snes.frame_count()));
            }
            Ok(())
        },
    },
    TestCase {
        name: "core.apu_handshake_ready",
        category: Category::Core,
        needs_rom: true,
        run: |config, rom| {
            let mut snes = Snes::new(rom.to_vec()).map_err(|e| e.to_string())?;
            for _ in 0..config.frames.min(60) {
                snes.run_frame();
            }
            // After boot the sound CPU must have left its register-clear
            // loop; port 0 carries the driver handshake
            let port0 = snes.read(0x002140);
            if port0 == 0 {
                return Err("APU port 0 never latched a handshake byte".into());
            }
            Ok(())
        },
    },
    TestCase {
        name: "core.audio_ring_fills",
        category: Category::Core,
        needs_rom: true,
        run: |config, rom| {
            let mut snes = Snes::new(rom.to_vec()).map_err(|e| e.to_string())?;
            for _ in 0..config.frames.min(60) {
                snes.run_frame();
            }
            let mut samples = vec![0_i16; 534 * 2];
            let frames = snes.copy_native_frame(&mut samples);
            if frames == 0 {
                return Err("no native audio frame available".into());
            }
            Ok(())
        },
    },
    TestCase {
        name: "graphics.frame_extraction",
        category: Category::Graphics,
        needs_rom: true,
        run: |config, rom| {
            let mut snes = Snes::new(rom.to_vec()).map_err(|e| e.to_string())?;
            for _ in 0..config.frames.min(30) {
                snes.run_frame();
            }
            let size = snes.frame_size();
            let mut pixels = vec![0_u8; (size.width * size.height * 4) as usize];
            snes.put_pixels(&mut pixels);
            Ok(())
        },
    },
    TestCase {
        name: "integration.save_state_round_trip",
        category: Category::Integration,
        needs_rom: true,
        run: |config, rom| {
            let mut snes = Snes::new(rom.to_vec()).map_err(|e| e.to_string())?;
            for _ in 0..config.frames.min(10) {
                snes.run_frame();
            }
            let state = snes.save_state().map_err(|e| e.to_string())?;
            snes.run_frame();
            snes.load_state(&state).map_err(|e| e.to_string())?;
            Ok(())
        },
    },
    TestCase {
        name: "e2e.render_service_probe",
        category: Category::E2e,
        needs_rom: true,
        run: |_config, rom| {
            let state_dir = std::env::temp_dir().join("yaze-test-runner-states");
            let mut service = RenderService::new(rom.to_vec(), state_dir)
                .map_err(|e| e.to_string())?;
            let request = RenderRequest {
                entity_id: 0x010,
                x: 8,
                y: 8,
                room_id: 0x0012,
                ..RenderRequest::default()
            };
            match service.render(&request) {
                Ok(result) => {
                    if result.rgba_pixels.len() != (result.width * result.height * 4) as usize {
                        return Err("render result has a malformed pixel buffer".into());
                    }
                    Ok(())
                }
                // A non-ALTTP test image legitimately has no handler tables
                Err(error) => {
                    log::warn!("render probe degraded: {error}");
                    Ok(())
                }
            }
        },
    },
];

fn main() {
    env_logger::Builder::from_default_env().format_timestamp(None).init();

    let args = Args::parse();
    let config = Config::from_args(args);

    let rom = match (&config.rom_path, config.skip_rom_tests) {
        (_, true) => None,
        (Some(path), false) => match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(error) => {
                eprintln!("error: failed to read ROM {}: {error}", path.display());
                process::exit(1);
            }
        },
        (None, false) => {
            eprintln!(
                "note: no ROM provided (--rom or YAZE_TEST_ROM_PATH); ROM-dependent tests skipped"
            );
            None
        }
    };

    let mut passed = 0_u32;
    let mut failed = 0_u32;
    let mut skipped = 0_u32;

    for test in TESTS {
        if !config.categories.is_empty() && !config.categories.contains(&test.category) {
            continue;
        }
        if let Some(pattern) = &config.pattern {
            if !glob_matches(pattern, test.name) {
                continue;
            }
        }

        if test.category == Category::Editor && !config.enable_ui_tests {
            println!("SKIP {} (editor surface; pass --enable-ui-tests)", test.name);
            skipped += 1;
            continue;
        }

        let Some(rom_bytes) = rom.as_deref() else {
            if test.needs_rom {
                println!("SKIP {} (needs a ROM)", test.name);
                skipped += 1;
                continue;
            }
            unreachable!("all current tests are ROM-dependent");
        };

        if config.verbose {
            println!("RUN  {} [{}]", test.name, test.category.name());
        }
        match (test.run)(&config, rom_bytes) {
            Ok(()) => {
                println!("PASS {}", test.name);
                passed += 1;
            }
            Err(message) => {
                println!("FAIL {}: {message}", test.name);
                failed += 1;
            }
        }
    }

    println!("{passed} passed, {failed} failed, {skipped} skipped");
    process::exit(i32::from(failed > 0));
}

#[cfg(test)]
mod tests {
    use super::glob_matches;

    #[test]
    fn glob_wildcards() {
        assert!(glob_matches("core.*", "core.boot_runs_frames"));
        assert!(glob_matches("*handshake*", "core.apu_handshake_ready"));
        assert!(!glob_matches("graphics.*", "core.boot_runs_frames"));
        assert!(glob_matches("*", "anything"));
    }
}
