// Copyright(c) The Maintainers of Nanvix.
// Licensed under the MIT License.

//!
//! # Memory Image Builder
//!
//! `mimgmake` constructs a memory image by preloading data and ELF files. Each command-line
//! argument places content at physical addresses; the finished image is serialized to a file
//! that the boot-time loader consumes.
//!

//==================================================================================================
// Imports
//==================================================================================================

// Must come first.
#[macro_use]
extern crate log;

use ::anyhow::Result;
use ::mimg::{
    args::{
        self,
        Args,
    },
    image::MemImage,
    logging,
    output::{
        self,
        ImageWriter,
    },
};
use ::std::{
    env,
    fs::File,
    io::BufWriter,
};

//==================================================================================================
// Standalone Functions
//==================================================================================================

fn main() -> Result<()> {
    // Initialize logger before doing anything else. If this fails, the program will panic.
    logging::initialize();

    let args: Args = Args::parse(env::args().collect())?;

    // Build the placement model by applying the placement arguments in order.
    let mut mimg: MemImage = MemImage::new();
    for arg in args.placements() {
        args::apply(&mut mimg, arg)?;
    }
    mimg.check_entry()?;
    mimg.log_summary(args.output());

    // Serialize the image.
    let file: File = match File::create(args.output()) {
        Ok(file) => file,
        Err(e) => {
            let reason: String =
                format!("unable to create output file \"{}\" (error={})", args.output(), e);
            error!("main(): {}", reason);
            anyhow::bail!(reason);
        },
    };
    let mut writer: ImageWriter<BufWriter<File>> = ImageWriter::new(BufWriter::new(file));
    output::write_image(&mut writer, &mimg)?;
    let written: usize = writer.finish()?;

    info!("wrote {} bytes to \"{}\"", written, args.output());

    Ok(())
}
