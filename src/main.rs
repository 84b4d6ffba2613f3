fn main() -> anyhow::Result<()> {
    radar_watch_lib::run()
}
