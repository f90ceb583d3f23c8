use clap::Parser;
use spz_lib::{
    convert_coordinates, read_spz, read_spz_async, write_spz, write_spz_async, CoordinateSystem,
    GaussianCloud, SpzVersion,
};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::process;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "SPZ Reader/Writer",
    version = "1.0",
    author = "Denis Avvakumov",
    about = "Reads, converts and writes SPZ files (Gaussian splats)"
)]
struct Cli {
    #[arg(
        short = 'i',
        long = "input",
        value_name = "INPUT",
        required = true,
        help = "Path to the input SPZ file (version 2 or 3)."
    )]
    input: String,

    #[arg(
        short = 'o',
        long = "output",
        value_name = "OUTPUT",
        help = "Path to the output SPZ file. Without it the input is only inspected."
    )]
    output: Option<String>,

    #[arg(
        short = 'f',
        long = "format-version",
        value_name = "VERSION",
        default_value = "2",
        value_parser = clap::value_parser!(u32).range(2..=3),
        help = "SPZ version to write."
    )]
    format_version: u32,

    #[arg(
        long = "from",
        value_name = "COORDINATE_SYSTEM",
        default_value = "UNSPECIFIED",
        help = "Coordinate system of the input (LDB, RDB, LUB, RUB, LDF, RDF, LUF, RUF)."
    )]
    from: CoordinateSystem,

    #[arg(
        long = "to",
        value_name = "COORDINATE_SYSTEM",
        default_value = "UNSPECIFIED",
        help = "Coordinate system to convert to before writing."
    )]
    to: CoordinateSystem,

    #[arg(
        short = 'p',
        long = "print",
        value_name = "COUNT",
        default_value = "0",
        help = "Print the first COUNT splats."
    )]
    print: usize,

    #[arg(
        short = 'a',
        long = "async",
        default_value = "false",
        help = "Enable asynchronous reading/writing mode."
    )]
    async_mode: bool,
}

fn print_summary(cloud: &GaussianCloud, count: usize) {
    println!(
        "Points: {} | SH degree: {} | Antialiased: {}",
        cloud.num_points(),
        cloud.sh_degree(),
        cloud.is_antialiased()
    );
    for index in 0..count.min(cloud.num_points() as usize) {
        if let Some(splat) = cloud.splat(index) {
            print!("{}", splat);
        }
    }
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let version = SpzVersion::try_from(cli.format_version)?;
    let mode = if cli.async_mode {
        "Asynchronous"
    } else {
        "Synchronous"
    };

    print!("Mode: {}\nInput: {}", mode, cli.input);
    match &cli.output {
        Some(output) => println!(" | Output: {} | Version: {}", output, version),
        None => println!(),
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let start = Instant::now();

    let read_result = if cli.async_mode {
        rt.block_on(async {
            let file = tokio::fs::File::open(&cli.input).await?;
            read_spz_async(file)
                .await
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
        })
    } else {
        File::open(&cli.input)
            .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
            .and_then(|file| {
                read_spz(BufReader::new(file))
                    .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
            })
    };
    let mut cloud = read_result.unwrap_or_else(|e| {
        eprintln!("Error reading input file {}: {}", cli.input, e);
        process::exit(1);
    });
    log::info!("Read {} points in {} ms", cloud.num_points(), start.elapsed().as_millis());

    print_summary(&cloud, cli.print);

    if cli.from != CoordinateSystem::Unspecified && cli.to != CoordinateSystem::Unspecified {
        println!("Converting coordinates: {} -> {}", cli.from, cli.to);
        convert_coordinates(&mut cloud, cli.from, cli.to);
    }

    let Some(output) = &cli.output else {
        return Ok(());
    };

    let start = Instant::now();
    let result = if cli.async_mode {
        rt.block_on(async {
            let file = tokio::fs::File::create(output).await?;
            let mut writer = tokio::io::BufWriter::new(file);
            write_spz_async(&cloud, &mut writer, version)
                .await
                .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
        })
    } else {
        File::create(output)
            .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
            .and_then(|file| {
                write_spz(&cloud, BufWriter::new(file), version)
                    .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>)
            })
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error writing output '{}': {}", output, e);
        process::exit(1);
    });

    let elapsed = start.elapsed().as_millis();
    println!("Write Time: {} ms", elapsed);
    println!("Successfully wrote to '{}'.", output);

    Ok(())
}
