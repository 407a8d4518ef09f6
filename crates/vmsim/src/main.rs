use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use vmm::{
    ImageBuilder, MemoryFileSystem, MemoryManager, NoffHeader, Segment, VmConfig,
    config::{DEFAULT_PHYSICAL_FRAMES, DEFAULT_RESIDENT_LIMIT, DEFAULT_SWAP_SLOTS, STACK_PAGES},
    loader,
};
use vmsim::{Processor, parse_trace};

mod console;

#[derive(Parser)]
#[command(name = "vmsim")]
#[command(about = "Demand-paging simulator for executable images")]
struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an executable image from raw segment contents
    Build {
        /// File holding the code segment
        #[arg(short, long)]
        code: PathBuf,

        /// File holding the initialized data segment
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Size of the uninitialized data segment in bytes
        #[arg(short, long, default_value_t = 0)]
        bss: u32,

        /// Output executable
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print an executable's header and page layout
    Inspect {
        /// Executable image
        executable: PathBuf,

        /// Pages reserved for the stack
        #[arg(long, default_value_t = STACK_PAGES)]
        stack_pages: usize,
    },
    /// Replay a memory reference trace against an executable
    Run {
        /// Executable image
        executable: PathBuf,

        /// Trace of memory operations
        trace: PathBuf,

        /// Physical frames shared by the system
        #[arg(long, default_value_t = DEFAULT_PHYSICAL_FRAMES)]
        frames: usize,

        /// Frames the process may keep resident
        #[arg(long, default_value_t = DEFAULT_RESIDENT_LIMIT)]
        resident_limit: usize,

        /// Page-sized slots in the swap store
        #[arg(long, default_value_t = DEFAULT_SWAP_SLOTS)]
        swap_slots: usize,

        /// Pages reserved for the stack
        #[arg(long, default_value_t = STACK_PAGES)]
        stack_pages: usize,

        /// Print the value of every read
        #[arg(long)]
        show_reads: bool,

        /// Write pages evicted back to the executable into the image on disk
        #[arg(long)]
        persist: bool,
    },
}

fn build(
    code: PathBuf,
    data: Option<PathBuf>,
    bss: u32,
    output: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut builder = ImageBuilder::new().code(&fs::read(&code)?).uninit_data(bss);
    if let Some(data) = data {
        builder = builder.init_data(&fs::read(&data)?);
    }

    let image = builder.build();
    fs::write(&output, &image)?;

    println!("Wrote {} ({} bytes)", output.display(), image.len());
    print_header(&builder.header());
    Ok(())
}

fn inspect(executable: PathBuf, stack_pages: usize) -> Result<(), Box<dyn std::error::Error>> {
    let image = fs::read(&executable)?;
    let header = NoffHeader::from_bytes(&image)?;

    print_header(&header);
    println!();
    print!("{}", loader::build_page_table(&header, stack_pages));
    Ok(())
}

fn print_header(header: &NoffHeader) {
    fn row(name: &str, segment: &Segment) {
        println!(
            "{:<12} {:>8} {:>#10x} {:>#10x}",
            name, segment.size, segment.virtual_addr, segment.in_file_addr
        );
    }

    println!("{:<12} {:>8} {:>10} {:>10}", "segment", "size", "vaddr", "offset");
    row("code", &header.code);
    row("init data", &header.init_data);
    row("uninit data", &header.uninit_data);
}

struct RunOptions {
    config: VmConfig,
    show_reads: bool,
    persist: bool,
}

fn run(
    executable: PathBuf,
    trace: PathBuf,
    options: RunOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let operations = parse_trace(&fs::read_to_string(&trace)?)?;
    let name = image_name(&executable);

    let file_system = Arc::new(MemoryFileSystem::new());
    file_system.insert(&name, fs::read(&executable)?);

    let manager = MemoryManager::new(options.config, file_system.clone())?;
    let mut space = manager.spawn(&name)?;
    println!(
        "{}: {} pages, stack pointer {}",
        name,
        space.page_count(),
        space.initial_stack_pointer()
    );

    let mut processor = Processor::new(&mut space);
    let outcome = processor.run(&operations);
    let writes = operations[..processor.steps()]
        .iter()
        .filter(|op| op.is_write())
        .count();
    println!(
        "Completed {} of {} operations ({} writes), {} page faults",
        processor.steps(),
        operations.len(),
        writes,
        processor.page_faults()
    );

    match &outcome {
        Ok(reads) if options.show_reads => {
            for read in reads {
                println!("  step {:>4}: {} = {:#x}", read.step, read.operation, read.value);
            }
        }
        Ok(_) => {}
        Err(err) => println!("Stopped at {} (address {})", err, err.operation.address()),
    }

    println!("\nResident pages (oldest first):");
    for (page, frame) in space.resident_pages() {
        println!("  page {:>4} -> frame {}", page.as_usize(), frame.as_usize());
    }
    println!("\n{}", space.page_table());
    println!("{}", space.stats());

    if options.persist {
        drop(space);
        if let Some(file) = file_system.file(&name) {
            fs::write(&executable, file.contents())?;
            println!("Updated {}", executable.display());
        }
    }

    outcome.map(|_| ()).map_err(Into::into)
}

fn image_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "program".to_string())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    console::Console::init(args.verbose).map_err(|err| err.to_string())?;

    match args.command {
        Command::Build {
            code,
            data,
            bss,
            output,
        } => build(code, data, bss, output),
        Command::Inspect {
            executable,
            stack_pages,
        } => inspect(executable, stack_pages),
        Command::Run {
            executable,
            trace,
            frames,
            resident_limit,
            swap_slots,
            stack_pages,
            show_reads,
            persist,
        } => {
            let config = VmConfig::new()
                .with_physical_frames(frames)
                .with_resident_limit(resident_limit)
                .with_swap_slots(swap_slots)
                .with_stack_pages(stack_pages);
            let options = RunOptions {
                config,
                show_reads,
                persist,
            };
            run(executable, trace, options)
        }
    }
}
