//! Accelerator availability check
//!
//! Run with: cargo run -p cudapoa-core --features cuda --example device_check

use cudapoa_core::{BatchConfig, BufferLayout, GpuDevice};

fn main() {
    println!("cudapoa Device Check");
    println!("====================\n");

    #[cfg(feature = "cuda")]
    {
        match GpuDevice::count() {
            Ok(count) => println!("Total CUDA devices: {}", count),
            Err(e) => println!("Could not get device count: {}", e),
        }

        match GpuDevice::new(0) {
            Ok(device) => {
                println!("Device 0: Available");

                let stream = device.default_stream();
                match stream.alloc_zeros::<u8>(1024) {
                    Ok(_) => println!("GPU memory allocation: OK"),
                    Err(e) => println!("GPU memory allocation failed: {}", e),
                }
                match device.alloc_host::<u8>(1024) {
                    Ok(_) => println!("Pinned host allocation: OK"),
                    Err(e) => println!("Pinned host allocation failed: {}", e),
                }
            }
            Err(e) => {
                eprintln!("Failed to initialize CUDA device 0: {}", e);
                std::process::exit(1);
            }
        }
    }

    #[cfg(not(feature = "cuda"))]
    {
        println!("CUDA feature not enabled; batches run on the host backend.");
        println!("Host backend devices: {}", GpuDevice::count().unwrap_or(0));
        println!("Rebuild with: cargo run -p cudapoa-core --features cuda --example device_check");
    }

    match BufferLayout::new(&BatchConfig::from_env()) {
        Ok(layout) => println!("\n{}", layout.summary()),
        Err(e) => {
            eprintln!("Invalid batch configuration: {}", e);
            std::process::exit(1);
        }
    }
}
