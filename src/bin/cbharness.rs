use anyhow::Result;

fn main() -> Result<()> {
    cbharness::cli::run()
}
