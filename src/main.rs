use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use ucasset::codec::{CodecMethod, CodecRegistry, LibraryOodle, OodleConfig};
use ucasset::container::{self, DecodeOptions, DecodedContainer};
use ucasset::names::Name;
use ucasset::ContainerHeader;

#[derive(Parser)]
#[command(name = "ucasset", about = "Inspect combined .uasset/.uexp container entries")]
struct Cli {
    /// Reject headers with mismatched repeat values or unexpected package flags
    #[arg(long, global = true)]
    strict: bool,
    /// Check the stored name hashes against recomputed ones
    #[arg(long, global = true)]
    verify_hashes: bool,
    /// Path to oo2core_9_win64.dll (otherwise searched next to the working
    /// directory and the executable)
    #[arg(long, global = true)]
    oodle_lib: Option<PathBuf>,
    /// Download the Oodle library when it is not found locally
    #[arg(long, global = true)]
    allow_fetch: bool,
    /// Where --allow-fetch downloads the Oodle library from
    #[arg(long, global = true)]
    oodle_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header fields and table sizes
    Info {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List the names directory
    Names {
        input: PathBuf,
        /// Also print the CityHash64 of each lowercased name
        #[arg(long)]
        hashes: bool,
    },
    /// List export records with their corrected payload ranges
    Exports {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write one export's payload bytes to a file
    Extract {
        input: PathBuf,
        #[arg(short, long)]
        index: usize,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Compress a file with a registry codec: none, zlib, lz4, oodle
    Compress {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value = "zlib")]
        method: String,
    },
    /// Decompress a file with a registry codec
    Decompress {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value = "zlib")]
        method: String,
        /// Expected decompressed size in bytes
        #[arg(short, long)]
        size: usize,
    },
}

#[derive(Serialize)]
struct Summary<'a> {
    header: &'a ContainerHeader,
    names: usize,
    exports: usize,
    import_objects_bytes: usize,
    export_meta_bytes: usize,
    dependency_packages_bytes: usize,
    payload_start: u64,
    offset_correction: i64,
}

#[derive(Serialize)]
struct ExportRow<'a> {
    index: usize,
    object_name: Option<&'a Name>,
    class_name: Option<&'a Name>,
    serial_offset: u64,
    serial_size: u64,
    start: i64,
    end: i64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("warn"));
    let cli = Cli::parse();
    let opts = DecodeOptions {
        strict_header: cli.strict,
        verify_name_hashes: cli.verify_hashes,
    };
    let cli_oodle = OodleArgs {
        config: OodleConfig {
            library_path: cli.oodle_lib,
            allow_fetch: cli.allow_fetch,
        },
        url: cli.oodle_url,
    };

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let decoded = container::open(&input, &opts)?;
            let res = &decoded.resource;
            let summary = Summary {
                header: &res.header,
                names: res.names.len(),
                exports: res.exports.len(),
                import_objects_bytes: res.import_objects.len(),
                export_meta_bytes: res.export_meta.len(),
                dependency_packages_bytes: res.dependency_packages.len(),
                payload_start: decoded.payload_start,
                offset_correction: decoded.offset_correction(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            let h = &res.header;
            println!("── Container ────────────────────────────────────────────");
            println!("  Path              {}", input.display());
            println!("  Repeat            {:#x} / {:#x}", h.repeat[0], h.repeat[1]);
            println!("  Package flags     {:#010x}", h.package_flags);
            println!("  Total header size {} B", h.total_header_size);
            println!("  Names             {}", summary.names);
            println!("  Exports           {}", summary.exports);
            println!("  Import objects    {} B", summary.import_objects_bytes);
            println!("  Export meta       {} B", summary.export_meta_bytes);
            println!("  Dependencies      {} B", summary.dependency_packages_bytes);
            println!("  Payload start     {:#x}", summary.payload_start);
            println!("  Offset correction {}", summary.offset_correction);
        }

        // ── Names ────────────────────────────────────────────────────────────
        Commands::Names { input, hashes } => {
            let decoded = container::open(&input, &opts)?;
            for (i, name) in decoded.resource.names.iter().enumerate() {
                if hashes {
                    println!("[{i:02}][0x{i:02x}]: {name}  {:016x}", name.city_hash());
                } else {
                    println!("[{i:02}][0x{i:02x}]: {name}");
                }
            }
        }

        // ── Exports ──────────────────────────────────────────────────────────
        Commands::Exports { input, json } => {
            let decoded = container::open(&input, &opts)?;
            let rows = export_rows(&decoded);
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            println!("{:>4}  {:<32} {:<24} {:>10} {:>10}", "Idx", "Object", "Class", "Start", "End");
            for r in rows {
                println!("{:>4}  {:<32} {:<24} {:>10} {:>10}",
                    r.index,
                    display_or_unknown(r.object_name),
                    display_or_unknown(r.class_name),
                    r.start, r.end);
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, index, output } => {
            let mut src = BufReader::new(File::open(&input)?);
            let decoded = container::decode(&mut src, &opts)?;
            let data = decoded.read_export_payload(&mut src, index)?;
            std::fs::write(&output, &data)?;
            println!("Extracted export {index} ({} B) → {}", data.len(), output.display());
        }

        // ── Compress / Decompress ────────────────────────────────────────────
        Commands::Compress { input, output, method } => {
            let data = std::fs::read(&input)?;
            let packed = registry(&method, &cli_oodle).compress(&method, &data)?;
            write_report(&output, &packed, data.len())?;
        }
        Commands::Decompress { input, output, method, size } => {
            let data = std::fs::read(&input)?;
            let unpacked = registry(&method, &cli_oodle).decompress(&method, &data, size)?;
            write_report(&output, &unpacked, data.len())?;
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

struct OodleArgs {
    config: OodleConfig,
    url: Option<String>,
}

/// Only `oodle` needs anything resolved; other methods skip the library search.
fn registry(method: &str, args: &OodleArgs) -> CodecRegistry {
    if CodecMethod::from_name(method) != Some(CodecMethod::Oodle) {
        return CodecRegistry::new();
    }
    let source = LibraryOodle {
        fetch_url: args.url.clone(),
        ..LibraryOodle::standard()
    };
    CodecRegistry::resolve(&args.config, &source)
}

fn export_rows(decoded: &DecodedContainer) -> Vec<ExportRow<'_>> {
    let res = &decoded.resource;
    res.exports
        .iter()
        .zip(decoded.export_ranges())
        .map(|(e, r)| ExportRow {
            index: r.index,
            object_name: e.object_name(&res.names),
            class_name: e.class_name(&res.names),
            serial_offset: e.serial_offset,
            serial_size: e.serial_size,
            start: r.start,
            end: r.end,
        })
        .collect()
}

fn display_or_unknown(name: Option<&Name>) -> String {
    name.map_or_else(|| "?".to_string(), Name::to_string)
}

fn write_report(output: &Path, data: &[u8], input_len: usize) -> std::io::Result<()> {
    std::fs::write(output, data)?;
    println!("{input_len} B → {} B  {}", data.len(), output.display());
    Ok(())
}
