use log::{debug, error, trace, warn};
use std::ffi::CStr;
use std::os::raw::c_void;
use vulkanalia::vk;
use vulkanalia::vk::HasBuilder;

/// Routes validation layer messages into `log`, keyed by severity.
pub extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    let data = unsafe { *data };
    let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();
    let id = if data.message_id_name.is_null() {
        "-".into()
    } else {
        unsafe { CStr::from_ptr(data.message_id_name) }.to_string_lossy()
    };

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!("({type_:?}) [{id}] {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!("({type_:?}) [{id}] {message}");
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!("({type_:?}) [{id}] {message}");
    } else {
        trace!("({type_:?}) [{id}] {message}");
    }

    vk::FALSE
}

/// Messenger settings shared by instance creation (chained into the create
/// info) and the standalone messenger created right after.
pub fn messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .user_callback(Some(debug_callback))
}
