use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{BufferedUart, Config as UartConfig, DataBits, Parity, StopBits};
use embassy_time::{Duration, Timer, with_timeout};
use embedded_io_async::{Read, Write};
use trigger_core::multiplexer::EventSource;
use trigger_core::protocol::{Codec, MAX_REPLY_LEN, ProtocolCodec};
use trigger_core::serial::{SerialSession, SessionEvent};

use crate::board::{HOST_UART_BAUD, HOST_UART_BUFFER_SIZE, INTER_BYTE_TIMEOUT};
use crate::queues::HostProducer;
use crate::status;

pub type HostSession = SerialSession<Codec, HostProducer<'static>>;

const READ_CHUNK: usize = 64;

static mut UART_TX_BUFFER: [u8; HOST_UART_BUFFER_SIZE] = [0; HOST_UART_BUFFER_SIZE];
static mut UART_RX_BUFFER: [u8; HOST_UART_BUFFER_SIZE] = [0; HOST_UART_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART5>;
});

#[embassy_executor::task]
pub async fn run(
    mut session: HostSession,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = HOST_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = unsafe {
        BufferedUart::new(
            usart,
            rx_pin,
            tx_pin,
            &mut UART_TX_BUFFER,
            &mut UART_RX_BUFFER,
            UartIrqs,
            config,
        )
        .expect("failed to initialize host UART")
    };

    let (mut uart_tx, mut uart_rx) = uart.split();
    let mut ingress = [0u8; READ_CHUNK];
    let mut reply = [0u8; MAX_REPLY_LEN];

    defmt::info!(
        "serial: host link up ({} baud, {})",
        HOST_UART_BAUD,
        session.codec().variant().name()
    );

    loop {
        // While a packet is open, silence on the line closes it.
        let read = if session.has_pending() {
            match with_timeout(INTER_BYTE_TIMEOUT, uart_rx.read(&mut ingress)).await {
                Ok(read) => read,
                Err(_) => {
                    finish_packet(&mut session, &mut uart_tx, &mut reply).await;
                    continue;
                }
            }
        } else {
            uart_rx.read(&mut ingress).await
        };

        match read {
            Ok(count) if count > 0 => session.receive(&ingress[..count]),
            Ok(_) => {}
            Err(_) => {
                defmt::warn!("serial: UART read error");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    }
}

async fn finish_packet<W: Write>(session: &mut HostSession, uart_tx: &mut W, reply: &mut [u8]) {
    let Some(outcome) = session.end_of_packet(reply) else {
        return;
    };

    match &outcome.event {
        SessionEvent::Forwarded(command) => {
            defmt::debug!("serial: forwarded {}", defmt::Display2Format(command));
        }
        SessionEvent::Dropped(_) => status::record_dropped(EventSource::Host),
        event => defmt::warn!("serial: {}", defmt::Display2Format(event)),
    }

    if outcome.reply_len == 0 {
        return;
    }
    let bytes = &reply[..outcome.reply_len];
    if uart_tx.write_all(bytes).await.is_err() || uart_tx.flush().await.is_err() {
        defmt::warn!("serial: UART write error");
    }
}
