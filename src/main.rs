use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use exhume_body::Body;
use exhume_xfs::{AllocRec, AllocationGroup, InobtRec, XfsFS};
use log::{debug, error};
use prettytable::{Cell, Row, Table};
use serde_json::json;
use std::io::{Read, Seek};

struct Selection {
    agno: u32,
    superblock: bool,
    headers: bool,
    inodes: bool,
    free_inodes: bool,
    free_extents: bool,
    by_size: bool,
    json: bool,
}

fn headers_table(ag: &AllocationGroup) -> Table {
    let mut table = Table::new();
    let rows: Vec<(&str, String)> = vec![
        ("AG", format!("{}", ag.agno)),
        ("Length (blocks)", format!("{}", ag.agf.agf_length)),
        ("Free blocks", format!("{}", ag.agf.agf_freeblks)),
        ("Longest free extent", format!("{}", ag.agf.agf_longest)),
        (
            "By-block root / levels",
            format!("{} / {}", ag.agf.bno_root(), ag.agf.bno_level()),
        ),
        (
            "By-size root / levels",
            format!("{} / {}", ag.agf.cnt_root(), ag.agf.cnt_level()),
        ),
        ("Free list", format!("{:?}", ag.free_list())),
        ("Allocated inodes", format!("{}", ag.agi.agi_count)),
        ("Free inodes", format!("{}", ag.agi.agi_freecount)),
        (
            "Inode root / levels",
            format!("{} / {}", ag.agi.agi_root, ag.agi.agi_level),
        ),
        (
            "Free-inode root / levels",
            format!("{} / {}", ag.agi.agi_free_root, ag.agi.agi_free_level),
        ),
        ("Unlinked buckets", format!("{:?}", ag.agi.unlinked_heads())),
    ];
    for (name, value) in rows {
        table.add_row(Row::new(vec![Cell::new(name), Cell::new(&value)]));
    }
    table
}

fn inode_table<T: Read + Seek>(fs: &XfsFS<T>, agno: u32, records: &[InobtRec]) -> Table {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Start inode"),
        Cell::new("Absolute"),
        Cell::new("Count"),
        Cell::new("Free"),
        Cell::new("Holemask"),
        Cell::new("Free mask"),
    ]));
    for record in records {
        table.add_row(Row::new(vec![
            Cell::new(&format!("{}", record.ir_startino)),
            Cell::new(
                &fs.inode_number(agno, record.ir_startino)
                    .map_or_else(|| "-".to_string(), |ino| ino.to_string()),
            ),
            Cell::new(&format!("{}", record.ir_count)),
            Cell::new(&format!("{}", record.ir_freecount)),
            Cell::new(&format!("0x{:04x}", record.ir_holemask)),
            Cell::new(&format!("0x{:016x}", record.ir_free)),
        ]));
    }
    table
}

fn extent_table(extents: &[AllocRec]) -> Table {
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Start block"),
        Cell::new("Blocks"),
        Cell::new("Last block"),
    ]));
    for extent in extents {
        table.add_row(Row::new(vec![
            Cell::new(&format!("{}", extent.ar_startblock)),
            Cell::new(&format!("{}", extent.ar_blockcount)),
            Cell::new(&format!("{}", extent.end())),
        ]));
    }
    table
}

fn exhume<T: Read + Seek>(fs: &mut XfsFS<T>, selection: &Selection) -> exhume_xfs::Result<()> {
    if selection.superblock {
        if selection.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&fs.superblock.to_json()).unwrap_or_default()
            );
        } else {
            fs.superblock.print_sp_info();
        }
    }

    let wants_trees = selection.inodes
        || selection.free_inodes
        || selection.free_extents
        || selection.by_size;
    if !selection.headers && !wants_trees {
        return Ok(());
    }

    let ag = fs.load_ag(selection.agno)?;
    if selection.headers {
        if selection.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&ag.to_json()).unwrap_or_default()
            );
        } else {
            headers_table(&ag).printstd();
        }
    }
    if !wants_trees {
        return Ok(());
    }

    // Walk every requested tree before printing so a corrupt AG prints nothing.
    let inodes = if selection.inodes {
        Some(fs.inode_records(&ag)?)
    } else {
        None
    };
    let free_inodes = if selection.free_inodes {
        Some(fs.free_inode_records(&ag)?)
    } else {
        None
    };
    let by_block = if selection.free_extents {
        Some(fs.free_extents_by_block(&ag)?)
    } else {
        None
    };
    let by_size = if selection.by_size {
        Some(fs.free_extents_by_size(&ag)?)
    } else {
        None
    };

    if selection.json {
        let value = json!({
            "agno": ag.agno,
            "inodes": inodes,
            "free_inodes": free_inodes,
            "free_extents_by_block": by_block,
            "free_extents_by_size": by_size,
        });
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
        return Ok(());
    }
    if let Some(records) = &inodes {
        println!("Inode chunks of AG {}:", ag.agno);
        inode_table(fs, ag.agno, records).printstd();
    }
    if let Some(records) = &free_inodes {
        println!("Chunks with free inodes in AG {}:", ag.agno);
        inode_table(fs, ag.agno, records).printstd();
    }
    if let Some(extents) = &by_block {
        println!("Free extents of AG {} by start block:", ag.agno);
        extent_table(extents).printstd();
    }
    if let Some(extents) = &by_size {
        println!("Free extents of AG {} by size:", ag.agno);
        extent_table(extents).printstd();
    }
    Ok(())
}

fn process_partition(
    file_path: &str,
    format: &str,
    offset: &u64,
    selection: &Selection,
    verbose: &bool,
) {
    let mut body = Body::new_from(file_path.to_string(), format, Some(*offset));
    if *verbose {
        body.print_info();
    }

    let mut filesystem = match XfsFS::new(&mut body) {
        Ok(fs) => fs,
        Err(err) => {
            eprintln!("XfsFS object creation error: {}", err);
            std::process::exit(1);
        }
    };
    debug!("XfsFS created successfully.");

    if let Err(err) = exhume(&mut filesystem, selection) {
        error!("Decoding stopped at {}", err.location());
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn main() {
    let matches = Command::new("exhume_xfs")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Exhume the allocation group metadata from an XFS partition.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the body to exhume."),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The format of the file, either 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .required(true)
                .help("The XFS partition starts at address 0x...."),
        )
        .arg(
            Arg::new("ag")
                .short('a')
                .long("ag")
                .value_parser(maybe_hex::<u32>)
                .default_value("0")
                .help("The allocation group to decode."),
        )
        .arg(
            Arg::new("superblock")
                .short('s')
                .long("superblock")
                .action(ArgAction::SetTrue)
                .help("Display the primary superblock."),
        )
        .arg(
            Arg::new("headers")
                .short('H')
                .long("headers")
                .action(ArgAction::SetTrue)
                .help("Display the AGF, AGI and AGFL of the allocation group."),
        )
        .arg(
            Arg::new("inodes")
                .short('i')
                .long("inodes")
                .action(ArgAction::SetTrue)
                .help("List the inode chunks of the allocation group."),
        )
        .arg(
            Arg::new("free_inodes")
                .short('F')
                .long("free-inodes")
                .action(ArgAction::SetTrue)
                .help("List the chunks holding free inodes."),
        )
        .arg(
            Arg::new("free_extents")
                .short('e')
                .long("free-extents")
                .action(ArgAction::SetTrue)
                .help("List the free extents ordered by start block."),
        )
        .arg(
            Arg::new("by_size")
                .short('c')
                .long("by-size")
                .action(ArgAction::SetTrue)
                .help("List the free extents ordered by length."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let file_path = matches.get_one::<String>("body").unwrap();
    let format = matches.get_one::<String>("format").unwrap();
    let offset = matches.get_one::<u64>("offset").unwrap();
    let verbose = matches.get_flag("verbose");

    let level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let selection = Selection {
        agno: *matches.get_one::<u32>("ag").unwrap_or(&0),
        superblock: matches.get_flag("superblock"),
        headers: matches.get_flag("headers"),
        inodes: matches.get_flag("inodes"),
        free_inodes: matches.get_flag("free_inodes"),
        free_extents: matches.get_flag("free_extents"),
        by_size: matches.get_flag("by_size"),
        json: matches.get_flag("json"),
    };

    process_partition(file_path, format, offset, &selection, &verbose);
}
