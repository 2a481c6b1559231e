use anyhow::{Result, ensure};

use crate::{
    cli::ProbeArgs,
    identifiers::{MIN_IDENTIFIER_LENGTH, sanitize_identifiers},
    inference::{NullMarkers, infer_columns},
    load_cmd::read_input,
    table,
};

pub fn execute(args: &ProbeArgs) -> Result<()> {
    ensure!(
        args.max_identifier_length >= MIN_IDENTIFIER_LENGTH,
        "--max-identifier-length must be at least {MIN_IDENTIFIER_LENGTH}"
    );
    let source = read_input(&args.input)?;
    let sanitized = sanitize_identifiers(&source.headers(), args.max_identifier_length);
    let columns = infer_columns(&source, &sanitized, args.sample_rows, &NullMarkers::default());
    print!("{}", table::render_schema(&columns));
    Ok(())
}
