fn main() -> anyhow::Result<()> {
    snapshelf_lib::run()
}
