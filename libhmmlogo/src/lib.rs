pub mod alphabet;
pub mod conservation;
pub mod skylign;
pub mod structs;

#[cfg(test)]
#[ctor::ctor]
fn init_backtrace() {
    color_backtrace::install();
}
