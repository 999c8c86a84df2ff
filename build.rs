// build.rs

fn main() -> anyhow::Result<()> {
    build_data::set_BUILD_TIMESTAMP();
    build_data::no_debug_rebuilds().map_err(anyhow::Error::msg)?;
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
    Ok(())
}
// EOF
