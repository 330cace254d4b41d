use std::slice;

use clap::Parser;
use log::LevelFilter;
use mbr_nostd::{MasterBootRecord, PartitionTable};
use pretty_hex::pretty_hex;
use sdcard::{bus::linux, Config, SD};
use size::Size;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Specify SPI device
    #[clap(short, long, value_parser)]
    spi: String,

    /// Specify chip-select GPIO number
    #[clap(short, long, value_parser)]
    cs: u16,

    /// Leave CRC checking disabled on the card
    #[clap(long)]
    no_crc: bool,

    /// Clock rate in Hz once initialized
    #[clap(long, default_value_t = 10_000_000)]
    speed: u32,

    /// Hex dump the given block
    #[clap(short, long)]
    dump: Option<u32>,

    /// Increase log verbosity
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(args: &Args) -> Result<(), String> {
    let config = Config::default();
    let config = config.with_crc(!args.no_crc).with_speed(config.pre_init_hz, args.speed);
    let bus = linux::spi(&args.spi, args.cs, config).map_err(|e| e.to_string())?;
    let mut sd = SD::new(bus);
    sd.init().map_err(|e| format!("{:?}", e))?;
    println!("Card: {:?}", sd.card());
    if let Some(cid) = sd.cid() {
        let name = cid.product_name();
        println!("Product: {}", String::from_utf8_lossy(&name));
        println!("Manufactured: {}/{}", cid.manufacturing_year(), cid.manufacturing_month());
        println!("Serial: {:#010x}", cid.serial_number());
    }
    if let Some(capacity) = sd.capacity() {
        println!("Capacity: {} ({} blocks)", Size::from_bytes(capacity), sd.num_blocks().unwrap_or(0));
    }
    match sd.au_size() {
        Ok(Some(au_size)) => println!("AU size: {}", Size::from_bytes(au_size)),
        Ok(None) => println!("AU size: not defined"),
        Err(e) => println!("AU size: {:?}", e),
    }

    let mut buffer = [0u8; 512];
    if let Some(block) = args.dump {
        sd.read(block, slice::from_mut(&mut buffer).iter_mut()).map_err(|e| format!("{:?}", e))?;
        println!("Block {}:\n{}", block, pretty_hex(&buffer));
    }

    sd.read(0, slice::from_mut(&mut buffer).iter_mut()).map_err(|e| format!("{:?}", e))?;
    let mbr = MasterBootRecord::from_bytes(&buffer).map_err(|e| format!("{:?}", e))?;
    for partition in mbr.partition_table_entries().iter() {
        println!("{:?}", partition);
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();
    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
