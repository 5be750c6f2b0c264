//! Decode - Archive Decoding Command
//!
//! Restores f32 tensors from an archive, either all of them or one by name.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use quantpack_quant::TensorCatalog;
use quantpack_serialize::{
    decode_archive, decode_tensor, format_size, save_catalog, thread_pool, ArchiveReader,
};

use super::utils::{
    check_output, format_number, print_header, print_info, print_kv, print_success, require_input,
};
use crate::cli::DecodeArgs;
use crate::error::CliResult;

/// Execute the `decode` command
pub fn execute(args: DecodeArgs) -> CliResult<()> {
    print_header("Archive Decoding");

    require_input(&args.input)?;
    check_output(&args.output, args.overwrite)?;

    let mut reader = ArchiveReader::open_path(&args.input)?;
    print_kv("Archive", &args.input.display().to_string());
    print_kv("Records", &format_number(reader.manifest().len()));
    print_kv("Archive size", &format_size(reader.archive_len()));

    let catalog = match &args.tensor {
        Some(name) => {
            print_info(&format!("Decoding '{name}'..."));
            TensorCatalog::from_tensors(vec![decode_tensor(&mut reader, name)?])?
        }
        None => {
            print_info("Decoding all tensors...");
            let pool = thread_pool(args.threads)?;
            pool.install(|| decode_archive(&mut reader))?
        }
    };

    save_catalog(&catalog, &args.output)?;

    print_success(&format!(
        "Decoded {} tensors ({} parameters) to {}",
        catalog.len(),
        format_number(catalog.total_params()),
        args.output.display()
    ));
    Ok(())
}
