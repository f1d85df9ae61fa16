#![no_main]
use libfuzzer_sys::fuzz_target;
use peimage::buffers::InputMemoryBuffer;
use peimage::image::{build, load, ImageBuildOptions, ImageLoadOptions};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    for allow_virtual_headers in [false, true] {
        let options = ImageLoadOptions {
            allow_virtual_headers,
            ..Default::default()
        };
        let buffer = Arc::new(InputMemoryBuffer::from(data.to_vec()));
        let result = load(buffer, &options);
        if result.is_ok() {
            let _ = build(&result.image, &ImageBuildOptions::default());
        }
    }
});
