//! Evaluate zeta(s) for a few arguments inside a float scope
//!
//! Reads `gnump.toml` from the current directory or its parents when present.

use gnump_config::ConfigLoader;
use gnump_runtime::engine::reference;
use gnump_runtime::numeric::FLOAT;
use gnump_runtime::{Arg, Bridge};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let cwd = std::env::current_dir()?;
    let config = match ConfigLoader::new().load_from_directory(&cwd) {
        Ok(config) => config.bridge,
        Err(e) => {
            eprintln!("using defaults: {}", e);
            Default::default()
        }
    };

    let bridge = Bridge::new(reference::engine(&config)?, &config)?.with_numeric_classes()?;

    for s in [2.0, 3.0, 4.0, 0.5, -1.0] {
        let value = bridge.float_scope(|f| {
            let x = f.create(&[bridge.precision_arg()?, Arg::from(s)])?;
            bridge.call(&x, "zeta", &[])?;
            bridge.call(&x, "to_string", &[])
        })?;
        println!("zeta({}) = {}", s, value);
    }

    let version = bridge.call_static(FLOAT, "version", &[])?;
    println!("{}", version);
    Ok(())
}
