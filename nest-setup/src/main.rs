fn main() -> anyhow::Result<()> {
    nest_setup::run()
}
