mod common;

use callscope::resolver::{AddressResolver, AddressStatus, SymbolBackend};
use callscope::symbolization::{
    MapRegion, RangeIndex, ResolutionPool, SymbolDumpTool, SymbolizerTool,
};
use common::{touch, write_script, ECHO_SYMBOLIZER};

const MAPS: &str = "\
00400000-00401000 r-xp 00000000 fd:01 100 /lib/libfoo.so
00401000-00402000 rw-p 00001000 fd:01 100 /lib/libfoo.so
7f0000000000-7f0000010000 r-xp 00004000 fd:01 200 /system/lib/libbar.so
";

const FAKE_NM: &str = r#"
case "$2" in
    *libfoo.so)
        echo "                 U puts"
        echo "0000000000000010 0000000000000020 T foo"
        echo "0000000000000030 0000000000000008 t helper"
        ;;
    *) exit 1 ;;
esac
"#;

fn ranges() -> RangeIndex {
    RangeIndex::build(MAPS.lines(), MapRegion::is_executable).unwrap()
}

#[tokio::test]
async fn test_symbol_table_backend_end_to_end() {
    let tools = tempfile::tempdir().unwrap();
    let objdir = tempfile::tempdir().unwrap();
    touch(objdir.path(), "libfoo.so");

    let nm = write_script(tools.path(), "nm", FAKE_NM);
    let backend = SymbolBackend::SymbolDump(SymbolDumpTool::locate(nm.to_str().unwrap()).unwrap());
    let resolver = AddressResolver::new(ranges(), objdir.path(), backend);

    let index = resolver.resolve([0x40_0010, 0x40_002f, 0x40_0034, 0x40_0040, 0x50_0000]).await;
    assert_eq!(index.len(), 5);

    let foo = index.get(0x40_0010).unwrap();
    assert_eq!(foo.status, AddressStatus::Resolved);
    assert_eq!(foo.symbol, "foo");
    assert_eq!(foo.offset, Some(0x10));
    assert_eq!(foo.pathname.as_deref(), Some("/lib/libfoo.so"));
    assert_eq!(foo.location, "??:0");

    assert_eq!(index.get(0x40_002f).unwrap().symbol, "foo");
    assert_eq!(index.get(0x40_0034).unwrap().symbol, "helper");
    assert_eq!(index.get(0x40_0040).unwrap().status, AddressStatus::SymbolUnknown);
    assert_eq!(index.get(0x40_0040).unwrap().symbol, "?");

    // Only executable mappings are indexed, and 0x500000 is in none of them
    let unmapped = index.get(0x50_0000).unwrap();
    assert_eq!(unmapped.status, AddressStatus::Unmapped);
    assert_eq!(unmapped.symbol, "?");
    assert_eq!(unmapped.pathname, None);
}

#[tokio::test]
async fn test_missing_object_is_skipped() {
    let tools = tempfile::tempdir().unwrap();
    let objdir = tempfile::tempdir().unwrap();
    touch(objdir.path(), "libfoo.so");

    let nm = write_script(tools.path(), "nm", FAKE_NM);
    let backend = SymbolBackend::SymbolDump(SymbolDumpTool::locate(nm.to_str().unwrap()).unwrap());
    let resolver = AddressResolver::new(ranges(), objdir.path(), backend);

    let index = resolver.resolve([0x7f00_0000_0100, 0x40_0010]).await;
    let bar = index.get(0x7f00_0000_0100).unwrap();
    assert_eq!(bar.status, AddressStatus::ObjectMissing);
    assert_eq!(bar.pathname.as_deref(), Some("/system/lib/libbar.so"));
    assert_eq!(bar.offset, Some(0x4100));
    assert_eq!(bar.symbol, "?");

    assert_eq!(index.get(0x40_0010).unwrap().status, AddressStatus::Resolved);
}

#[tokio::test]
async fn test_backend_failure_is_scoped_to_its_object() {
    let tools = tempfile::tempdir().unwrap();
    let objdir = tempfile::tempdir().unwrap();
    touch(objdir.path(), "libfoo.so");
    touch(objdir.path(), "libbar.so");

    // The fake nm fails for anything but libfoo.so
    let nm = write_script(tools.path(), "nm", FAKE_NM);
    let backend = SymbolBackend::SymbolDump(SymbolDumpTool::locate(nm.to_str().unwrap()).unwrap());
    let resolver = AddressResolver::new(ranges(), objdir.path(), backend);

    let index = resolver.resolve([0x7f00_0000_0100, 0x40_0010]).await;
    let bar = index.get(0x7f00_0000_0100).unwrap();
    assert_eq!(bar.status, AddressStatus::SymbolizerFailed);
    assert!(bar.error.as_deref().unwrap().contains("exited with status 1"));

    assert_eq!(index.get(0x40_0010).unwrap().symbol, "foo");
}

#[tokio::test]
async fn test_addr2line_backend_end_to_end() {
    let tools = tempfile::tempdir().unwrap();
    let objdir = tempfile::tempdir().unwrap();
    touch(objdir.path(), "libfoo.so");
    touch(objdir.path(), "libbar.so");

    let addr2line = write_script(tools.path(), "addr2line", ECHO_SYMBOLIZER);
    let tool = SymbolizerTool::locate(addr2line.to_str().unwrap()).unwrap();
    let backend = SymbolBackend::Addr2line(ResolutionPool::new(tool, 2));
    let resolver = AddressResolver::new(ranges(), objdir.path(), backend);

    let index = resolver.resolve([0x40_0010, 0x40_0020, 0x7f00_0000_0008]).await;
    let foo = index.get(0x40_0020).unwrap();
    assert_eq!(foo.status, AddressStatus::Resolved);
    assert_eq!(foo.symbol, "fn_20");
    assert_eq!(foo.location, "src/20.c:1");

    let bar = index.get(0x7f00_0000_0008).unwrap();
    assert_eq!(bar.symbol, "fn_4008");
    assert_eq!(bar.pathname.as_deref(), Some("/system/lib/libbar.so"));
}

#[tokio::test]
async fn test_unknown_symbols_from_addr2line() {
    let tools = tempfile::tempdir().unwrap();
    let objdir = tempfile::tempdir().unwrap();
    touch(objdir.path(), "libfoo.so");

    let addr2line = write_script(
        tools.path(),
        "addr2line",
        "while read -r off; do echo '??'; echo '??:0'; done\n",
    );
    let tool = SymbolizerTool::locate(addr2line.to_str().unwrap()).unwrap();
    let backend = SymbolBackend::Addr2line(ResolutionPool::new(tool, 1));
    let resolver = AddressResolver::new(ranges(), objdir.path(), backend);

    let index = resolver.resolve([0x40_0010]).await;
    let info = index.get(0x40_0010).unwrap();
    assert_eq!(info.status, AddressStatus::SymbolUnknown);
    assert_eq!(info.symbol, "?");
    assert_eq!(index.display_name(0x40_0010), "0x400010");
}
